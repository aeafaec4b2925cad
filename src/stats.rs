use std::time::Duration;

/// Running round-trip statistics for one ping target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub sent: u64,
    pub lost: u64,
    /// min/avg/max RTT in milliseconds, over answered probes only
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

pub enum Sample {
    Rtt(Duration),
    Timeout,
}

impl Stats {
    pub fn record(&mut self, sample: Sample) {
        self.sent += 1;
        match sample {
            Sample::Rtt(rtt) => {
                let ms = rtt.as_secs_f64() * 1000.0;
                let received = self.received();
                if received == 1 {
                    self.min = ms;
                    self.max = ms;
                    self.avg = ms;
                    return;
                }
                self.min = self.min.min(ms);
                self.max = self.max.max(ms);
                self.avg += (ms - self.avg) / received as f64;
            }
            Sample::Timeout => self.lost += 1,
        }
    }

    pub fn received(&self) -> u64 {
        self.sent - self.lost
    }

    pub fn packet_loss(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.lost as f64 / self.sent as f64 * 100.0
    }
}
