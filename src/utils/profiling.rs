use std::time::{Duration, Instant};

/// Timing of one culling frame, split by stage.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CullProfiler {
    pub pyramid_time: Duration,
    pub kernel_time: Duration,
    pub draw_time: Duration,
    pub total_frame_time: Duration,

    pub object_count: u32,
    pub visible_count: u32,
    pub pyramid_levels: usize,
}

impl CullProfiler {
    /// Folds another context's stage timings into this frame.
    pub fn merge(&mut self, other: &CullProfiler) {
        self.pyramid_time += other.pyramid_time;
        self.kernel_time += other.kernel_time;
        self.draw_time += other.draw_time;
        self.total_frame_time += other.total_frame_time;
        self.object_count = self.object_count.max(other.object_count);
        self.visible_count = self.visible_count.max(other.visible_count);
        self.pyramid_levels = self.pyramid_levels.max(other.pyramid_levels);
    }

    pub fn report(&self) {
        let total_us = self.total_frame_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        log::info!("--- Culling Profile ---");
        log::info!(
            "Objects: {}, Visible: {}, Pyramid levels: {}",
            self.object_count,
            self.visible_count,
            self.pyramid_levels
        );
        log::info!(
            "Total Frame: {:.2} ms",
            self.total_frame_time.as_secs_f32() * 1000.0
        );
        for (label, time) in [
            ("Pyramid", self.pyramid_time),
            ("Kernel ", self.kernel_time),
            ("Draw   ", self.draw_time),
        ] {
            log::info!(
                "  {label}: {:.2} ms ({:.1}%)",
                time.as_secs_f32() * 1000.0,
                (time.as_micros() as f32 / total_us) * 100.0
            );
        }
        log::info!("-----------------------");
    }
}

pub struct ScopedTimer<'a> {
    start: Instant,
    output: &'a mut Duration,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(output: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            output,
        }
    }
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        *self.output += self.start.elapsed();
    }
}
