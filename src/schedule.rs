use burn::LearningRate;
use burn::lr_scheduler::LrScheduler;
use burn::tensor::backend::Backend;

/// Decays the learning rate by `gamma` each time the iteration count passes a milestone.
#[derive(Clone, Debug)]
pub struct MultiStepLrScheduler {
    initial_lr: LearningRate,
    gamma: f64,
    milestones: Vec<usize>,
    iteration: usize,
}

impl MultiStepLrScheduler {
    /// `milestones` are iteration counts; they are sorted and deduplicated.
    pub fn new(initial_lr: LearningRate, gamma: f64, mut milestones: Vec<usize>) -> Self {
        milestones.sort_unstable();
        milestones.dedup();
        Self {
            initial_lr,
            gamma,
            milestones,
            iteration: 0,
        }
    }

    /// Converts epoch milestones into iteration milestones.
    pub fn from_epochs(
        initial_lr: LearningRate,
        gamma: f64,
        epoch_milestones: &[usize],
        iterations_per_epoch: usize,
    ) -> Self {
        let per_epoch = iterations_per_epoch.max(1);
        Self::new(
            initial_lr,
            gamma,
            epoch_milestones.iter().map(|epoch| epoch * per_epoch).collect(),
        )
    }

    fn lr_at(&self, iteration: usize) -> LearningRate {
        let passed = self
            .milestones
            .iter()
            .take_while(|milestone| **milestone <= iteration)
            .count();
        self.initial_lr * self.gamma.powi(passed as i32)
    }
}

impl LrScheduler for MultiStepLrScheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let lr = self.lr_at(self.iteration);
        self.iteration += 1;
        lr
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.iteration
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.iteration = record;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn decays_after_each_milestone() {
        let mut scheduler = MultiStepLrScheduler::from_epochs(1.0, 0.1, &[2, 3], 2);
        let lrs: Vec<f64> = (0..8).map(|_| scheduler.step()).collect();
        let expected = [1.0, 1.0, 1.0, 1.0, 0.1, 0.1, 0.01, 0.01];
        for (lr, expected) in lrs.iter().zip(expected) {
            assert!((lr - expected).abs() < 1e-12, "{lrs:?}");
        }
    }

    #[test]
    fn unsorted_milestones_are_normalized() {
        let scheduler = MultiStepLrScheduler::new(3e-4, 0.5, vec![10, 5, 5]);
        assert!((scheduler.lr_at(4) - 3e-4).abs() < 1e-12);
        assert!((scheduler.lr_at(5) - 1.5e-4).abs() < 1e-12);
        assert!((scheduler.lr_at(10) - 0.75e-4).abs() < 1e-12);
    }

    #[test]
    fn record_restores_position() {
        let mut scheduler = MultiStepLrScheduler::new(1.0, 0.1, vec![1]);
        scheduler.step();
        let record = scheduler.to_record::<NdArray<f32>>();

        let mut restored = MultiStepLrScheduler::new(1.0, 0.1, vec![1]).load_record::<NdArray<f32>>(record);
        assert!((restored.step() - 0.1).abs() < 1e-12);
    }
}
