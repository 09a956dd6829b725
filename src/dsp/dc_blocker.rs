/// One-pole DC blocking high-pass: `y[n] = x[n] − x[n−1] + α·y[n−1]`.
///
/// Removes capture-path DC offset before it reaches the echo canceller,
/// where it would otherwise dominate the lowest bins of the PSD.
#[derive(Debug, Clone, Copy)]
pub struct DcBlocker {
    alpha: f32,
    x1: f32,
    y1: f32,
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self::new(0.995)
    }
}

impl DcBlocker {
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 0.9999)
        } else {
            0.995
        };
        Self {
            alpha,
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = x - self.x1 + self.alpha * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }

    pub fn process_in_place(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = self.process(*s);
        }
    }
}
