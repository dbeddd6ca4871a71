//! Sliding-window early stopping for epoch-trained models

use crate::core::{
    CancellationToken, ClassifierError, FeatureVector, ProgressEvent, ProgressSink, Result,
};
use log::{debug, error, info};
use rand::RngCore;
use std::collections::VecDeque;

/// A model trained one pass over the data at a time
pub trait EpochModel: Clone {
    /// One full training pass
    fn train_epoch(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<()>;

    /// Error on held-out examples, lower is better
    fn validation_error(&self, inputs: &[FeatureVector], codes: &[usize]) -> Result<f64>;
}

/// Why training ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every windowed error was identical
    Plateau,
    /// Newer half of the window averaged higher than the older half
    Rising,
    /// Iteration budget used up
    Exhausted,
}

/// Best snapshot of one training run
#[derive(Debug, Clone)]
pub struct EarlyStopped<M> {
    pub model: M,
    pub validation_error: f64,
    /// Epoch (1-based) the snapshot was taken after
    pub epoch: usize,
    pub epochs_run: usize,
    pub reason: StopReason,
}

pub struct EarlyStoppingTrainer<'a> {
    window: usize,
    max_epochs: usize,
    /// Evaluate the stop rules; off means run every epoch
    stop_early: bool,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

impl<'a> EarlyStoppingTrainer<'a> {
    pub fn new(
        window: usize,
        max_epochs: usize,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            window: window.max(2),
            max_epochs,
            stop_early: true,
            progress,
            cancel,
        }
    }

    /// Train for the whole budget, still keeping the best snapshot
    pub fn without_stopping(mut self) -> Self {
        self.stop_early = false;
        self
    }

    /// Train `model` on one subset, validating on the other after every epoch
    pub fn train<M: EpochModel>(
        &self,
        mut model: M,
        train: (&[FeatureVector], &[usize]),
        validation: (&[FeatureVector], &[usize]),
        rng: &mut dyn RngCore,
    ) -> Result<EarlyStopped<M>> {
        let (train_inputs, train_codes) = train;
        let (validation_inputs, validation_codes) = validation;

        // Only snapshots taken after an epoch are candidates; the first one always wins
        let mut best = EarlyStopped {
            model: model.clone(),
            validation_error: f64::INFINITY,
            epoch: 0,
            epochs_run: 0,
            reason: StopReason::Exhausted,
        };
        let mut errors: VecDeque<f64> = VecDeque::with_capacity(self.window);

        for epoch in 1..=self.max_epochs {
            self.cancel.check()?;
            model
                .train_epoch(train_inputs, train_codes, rng)
                .map_err(|e| self.report_out_of_memory(e, epoch))?;
            let error = model.validation_error(validation_inputs, validation_codes)?;
            best.epochs_run = epoch;

            if error < best.validation_error {
                best.model = model.clone();
                best.validation_error = error;
                best.epoch = epoch;
            }

            if errors.len() == self.window {
                errors.pop_front();
            }
            errors.push_back(error);

            if epoch % self.window == 0 {
                self.progress.report(
                    &ProgressEvent::new("network", "Epoch {} validation error {}")
                        .count(epoch)
                        .value(error)
                        .indent(1)
                        .replacing(),
                );
            }

            if self.stop_early && errors.len() == self.window {
                if let Some(reason) = stop_reason(&errors) {
                    debug!("Early stop after epoch {epoch}: {reason:?}");
                    best.reason = reason;
                    break;
                }
            }
        }

        info!(
            "Kept epoch {} of {} with validation error {:.4}",
            best.epoch, best.epochs_run, best.validation_error
        );
        Ok(best)
    }

    fn report_out_of_memory(&self, e: ClassifierError, epoch: usize) -> ClassifierError {
        if e.is_out_of_memory() {
            error!("Error: Out of memory during epoch {epoch}: {e}");
            self.progress
                .report(&ProgressEvent::new("network", "Error: Out of memory"));
        }
        e
    }
}

/// Stop rule evaluated on a full window
pub fn stop_reason(errors: &VecDeque<f64>) -> Option<StopReason> {
    let first = *errors.front()?;
    if errors.iter().all(|&e| e == first) {
        return Some(StopReason::Plateau);
    }
    let half = errors.len() / 2;
    let older = errors.iter().take(half).sum::<f64>() / half as f64;
    let newer = errors.iter().skip(errors.len() - half).sum::<f64>() / half as f64;
    if newer > older {
        Some(StopReason::Rising)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NullProgress;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Model whose validation error follows a fixed script per epoch
    #[derive(Clone)]
    struct Scripted {
        epoch: usize,
        script: fn(usize) -> f64,
    }

    impl EpochModel for Scripted {
        fn train_epoch(
            &mut self,
            _inputs: &[FeatureVector],
            _codes: &[usize],
            _rng: &mut dyn RngCore,
        ) -> Result<()> {
            self.epoch += 1;
            Ok(())
        }

        fn validation_error(&self, _inputs: &[FeatureVector], _codes: &[usize]) -> Result<f64> {
            Ok((self.script)(self.epoch))
        }
    }

    fn run(script: fn(usize) -> f64, trainer: EarlyStoppingTrainer<'_>) -> EarlyStopped<Scripted> {
        let mut rng = StdRng::seed_from_u64(1);
        trainer
            .train(
                Scripted { epoch: 0, script },
                (&[], &[]),
                (&[], &[]),
                &mut rng,
            )
            .unwrap()
    }

    #[test]
    fn test_stop_on_rising_error() {
        // U-shaped error with its minimum at epoch 30
        let token = CancellationToken::new();
        let trainer = EarlyStoppingTrainer::new(20, 1000, &NullProgress, &token);
        let result = run(|e| ((e as f64) - 30.0).abs() + 1.0, trainer);

        assert_eq!(result.reason, StopReason::Rising);
        assert_eq!(result.epoch, 30);
        assert_eq!(result.model.epoch, 30);
        assert_eq!(result.validation_error, 1.0);
        assert!(result.epochs_run < 60);
    }

    #[test]
    fn test_stop_on_plateau() {
        let token = CancellationToken::new();
        let trainer = EarlyStoppingTrainer::new(20, 1000, &NullProgress, &token);
        let result = run(|e| if e < 5 { 1.0 / (e as f64 + 1.0) } else { 0.1 }, trainer);

        assert_eq!(result.reason, StopReason::Plateau);
        assert_eq!(result.epochs_run, 24);
        assert_eq!(result.epoch, 5);
    }

    #[test]
    fn test_untrained_model_never_kept() {
        // Error grows from the start, so the untrained state looks best
        let token = CancellationToken::new();
        let trainer = EarlyStoppingTrainer::new(20, 1000, &NullProgress, &token);
        let result = run(|e| e as f64, trainer);

        assert_eq!(result.reason, StopReason::Rising);
        assert_eq!(result.epoch, 1);
        assert_eq!(result.model.epoch, 1);
        assert_eq!(result.validation_error, 1.0);
    }

    #[test]
    fn test_exhausted_budget() {
        let token = CancellationToken::new();
        let trainer = EarlyStoppingTrainer::new(20, 50, &NullProgress, &token);
        let result = run(|e| 1.0 / (e as f64 + 1.0), trainer);

        assert_eq!(result.reason, StopReason::Exhausted);
        assert_eq!(result.epochs_run, 50);
        assert_eq!(result.epoch, 50);
    }

    #[test]
    fn test_without_stopping_keeps_best() {
        let token = CancellationToken::new();
        let trainer = EarlyStoppingTrainer::new(20, 100, &NullProgress, &token).without_stopping();
        let result = run(|e| ((e as f64) - 30.0).abs(), trainer);

        assert_eq!(result.epochs_run, 100);
        assert_eq!(result.epoch, 30);
    }

    #[test]
    fn test_cancelled_before_first_epoch() {
        let token = CancellationToken::new();
        token.cancel();
        let trainer = EarlyStoppingTrainer::new(20, 100, &NullProgress, &token);
        let mut rng = StdRng::seed_from_u64(1);
        let result = trainer.train(
            Scripted {
                epoch: 0,
                script: |_| 1.0,
            },
            (&[], &[]),
            (&[], &[]),
            &mut rng,
        );
        assert!(matches!(result, Err(ClassifierError::Cancelled)));
    }

    #[test]
    fn test_stop_reason_rules() {
        let flat: VecDeque<f64> = vec![0.5; 4].into();
        assert_eq!(stop_reason(&flat), Some(StopReason::Plateau));

        let falling: VecDeque<f64> = vec![0.4, 0.3, 0.2, 0.1].into();
        assert_eq!(stop_reason(&falling), None);

        let rising: VecDeque<f64> = vec![0.1, 0.1, 0.2, 0.1].into();
        assert_eq!(stop_reason(&rising), Some(StopReason::Rising));
    }
}
