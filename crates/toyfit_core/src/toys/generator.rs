use std::cell::OnceCell;

use indexmap::IndexMap;
use rand::RngCore;
use tracing::trace;

use super::systematics::Systematic;
use crate::acceptance::Acceptance;
use crate::data::Dataset;
use crate::error::{FitError, ToyError};
use crate::model::{PhysicsModel, poisson_count};

/// Give up on accept/reject generation after this many batches
const MAX_ACCEPTANCE_BATCHES: usize = 1000;

/// Generation model together with the strategy that randomizes it
#[derive(Debug)]
pub struct ToyGenerator {
    model: PhysicsModel,
    systematic: Box<dyn Systematic>,
    input_values: OnceCell<IndexMap<String, f64>>,
}

impl ToyGenerator {
    pub fn new(model: PhysicsModel, systematic: Box<dyn Systematic>) -> Self {
        Self {
            model,
            systematic,
            input_values: OnceCell::new(),
        }
    }

    pub fn model(&self) -> &PhysicsModel {
        &self.model
    }

    pub fn systematic(&self) -> &dyn Systematic {
        self.systematic.as_ref()
    }

    /// Parameter values before the first randomization
    pub fn input_values(&self) -> &IndexMap<String, f64> {
        self.input_values.get_or_init(|| self.model.value_map())
    }

    /// Parameter values the last dataset was generated with
    pub fn current_values(&self) -> IndexMap<String, f64> {
        self.model.value_map()
    }

    pub fn randomize<R: RngCore>(&mut self, rng: &mut R) -> Result<usize, ToyError> {
        self.input_values();
        let changed = self.systematic.randomize(&mut self.model, rng)?;
        trace!(systematic = self.systematic.name(), changed, "Randomized model");
        Ok(changed)
    }

    /// Generate one toy dataset, randomizing the model first if requested.
    ///
    /// Each category is generated separately and the results are merged. With an
    /// acceptance the yield is Poisson-distributed around the expected number of events
    /// before any filtering.
    pub fn get_dataset<R: RngCore>(
        &mut self,
        acceptance: Option<&dyn Acceptance>,
        randomize: bool,
        rng: &mut R,
    ) -> Result<Dataset, ToyError> {
        if randomize {
            self.randomize(rng)?;
        }
        let mut parts = Vec::with_capacity(self.model.categories().len());
        for category in 0..self.model.categories().len() {
            let dataset = match acceptance {
                Some(acceptance) => self.generate_accepted(category, acceptance, rng)?,
                None => self.model.generate_extended(category, rng)?,
            };
            parts.push(dataset);
        }
        Ok(Dataset::merge(parts)?)
    }

    fn generate_accepted<R: RngCore>(
        &self,
        category: usize,
        acceptance: &dyn Acceptance,
        rng: &mut R,
    ) -> Result<Dataset, FitError> {
        let expected = self.model.expected_events(category, &self.model.values());
        let target = poisson_count(expected, rng);
        let mut collected = self.model.generate(category, 0, rng)?;
        let mut batches = 0;
        while collected.len() < target {
            if batches == MAX_ACCEPTANCE_BATCHES {
                return Err(FitError::Generation(format!(
                    "accepted only {} of {target} events after {batches} batches",
                    collected.len()
                )));
            }
            batches += 1;
            let batch = self.model.generate(category, 2 * target, rng)?;
            let accepted = acceptance.apply_accept_reject(batch, rng)?;
            collected
                .append(accepted)
                .map_err(|e| FitError::Generation(e.to_string()))?;
        }
        trace!(category, target, batches, "Generated accepted events");
        Ok(collected.sample(target, rng))
    }
}
