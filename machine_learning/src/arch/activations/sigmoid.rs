use std::f32;

#[derive(Clone, Copy, Debug)]
pub struct Sigmoid {
    amp: f32,
}

impl Sigmoid {
    pub fn new(amp: f32) -> Self {
        Self { amp }
    }

    pub fn f(&self, z: f32) -> f32 {
        self.amp / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let a = self.f(z);

        (a * (self.amp - a)) / self.amp
    }
}

impl Default for Sigmoid {
    fn default() -> Self {
        Self::new(1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_centered() {
        let s = Sigmoid::default();
        assert_eq!(s.f(0.), 0.5);
        assert_eq!(s.df(0.), 0.25);
    }

    #[test]
    fn saturates_without_nan() {
        let s = Sigmoid::default();
        assert!(s.f(-100.).abs() < 1e-6);
        assert!((s.f(100.) - 1.).abs() < 1e-6);
        assert!(s.df(-100.).is_finite());
    }
}
