use super::ParamGen;

/// Delegates generation to a sequence of generators, moving to the next one as each runs dry.
///
/// The model builder uses it to give every weight tensor its own fan in dependent range.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let param_gen = self.param_gens.get_mut(self.curr)?;

        match param_gen.sample(n) {
            Some(sample) if sample.len() == n => Some(sample),
            Some(mut sample) => {
                self.curr += 1;

                if let Some(rest) = self.sample(n - sample.len()) {
                    sample.extend(rest);
                }

                Some(sample)
            }
            None => {
                self.curr += 1;
                self.sample(n)
            }
        }
    }
}
