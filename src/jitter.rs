//! RFC 3550 interarrival jitter, tracked over two sample streams.
//!
//! Stream A sees every packet. Stream B sees only the first packet of each
//! access unit, so it measures how late whole frames arrive and drives the
//! playout delay.

#[cfg(test)]
mod jitter_test;

#[derive(Debug, Clone, Copy, Default)]
struct Stream {
    prev: Option<(u32, i64)>,
    /// J in RTP ticks.
    jitter: f64,
    samples: u64,
}

impl Stream {
    fn put(&mut self, rtp_time: u32, arrival_ticks: i64) {
        if let Some((prev_rtp, prev_arrival)) = self.prev {
            let delta_arrival = arrival_ticks - prev_arrival;
            let delta_rtp = rtp_time.wrapping_sub(prev_rtp) as i32 as i64;
            let d = (delta_arrival - delta_rtp).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.prev = Some((rtp_time, arrival_ticks));
        self.samples += 1;
    }
}

#[derive(Debug, Clone)]
pub struct JitterCalc {
    clock_rate: u32,
    inter_arrival: Stream,
    base: Stream,
}

impl JitterCalc {
    pub fn new(clock_rate: u32) -> Self {
        JitterCalc {
            clock_rate: clock_rate.max(1),
            inter_arrival: Stream::default(),
            base: Stream::default(),
        }
    }

    /// Restarts both streams from `(first_rtp, anchor_us)`. Stream B starts
    /// at `base_jitter_us` so the playout delay does not collapse.
    pub fn init(&mut self, first_rtp: u32, anchor_us: i64, base_jitter_us: i64) {
        let anchor_ticks = self.us_to_ticks(anchor_us);
        self.inter_arrival = Stream {
            prev: Some((first_rtp, anchor_ticks)),
            ..Default::default()
        };
        self.base = Stream {
            prev: Some((first_rtp, anchor_ticks)),
            jitter: self.us_to_ticks(base_jitter_us) as f64,
            samples: 0,
        };
    }

    pub fn put_inter_arrival_data(&mut self, rtp_time: u32, arrival_us: i64) {
        let ticks = self.us_to_ticks(arrival_us);
        self.inter_arrival.put(rtp_time, ticks);
    }

    pub fn put_base_data(&mut self, rtp_time: u32, arrival_us: i64) {
        let ticks = self.us_to_ticks(arrival_us);
        self.base.put(rtp_time, ticks);
    }

    /// Stream A, in RTP ticks, as carried in RR blocks.
    pub fn inter_arrival_jitter_ticks(&self) -> u32 {
        self.inter_arrival.jitter as u32
    }

    pub fn inter_arrival_jitter_ms(&self) -> u32 {
        self.ticks_to_ms(self.inter_arrival.jitter)
    }

    pub fn base_jitter_ms(&self) -> u32 {
        self.ticks_to_ms(self.base.jitter)
    }

    /// Samples fed to either stream since the last `init`.
    pub fn samples(&self) -> u64 {
        self.inter_arrival.samples + self.base.samples
    }

    fn us_to_ticks(&self, us: i64) -> i64 {
        ((us as i128 * self.clock_rate as i128) / 1_000_000) as i64
    }

    fn ticks_to_ms(&self, ticks: f64) -> u32 {
        (ticks * 1000.0 / self.clock_rate as f64) as u32
    }
}
