//! Cadencement temps réel de l'émission des chunks

use std::time::Duration;
use tokio::time::Instant;

/// Retard au-delà duquel on repart de l'instant présent plutôt que de rattraper
const MAX_LAG: Duration = Duration::from_secs(1);

/// Cadence l'émission sur le débit réel de la piste
///
/// Les `preroll` premiers chunks partent sans attente. Ensuite chaque chunk
/// avance une échéance de `octets / débit` secondes : le temps passé à lire
/// et envoyer est absorbé par l'échéance au lieu de s'accumuler en dérive.
#[derive(Debug)]
pub struct Pacer {
    preroll_remaining: usize,
    deadline: Option<Instant>,
}

impl Pacer {
    pub fn new(preroll_chunks: usize) -> Self {
        Self {
            preroll_remaining: preroll_chunks,
            deadline: None,
        }
    }

    /// Oublie l'échéance courante (après une attente hors lecture)
    pub fn rebase(&mut self) {
        self.deadline = None;
    }

    /// Attend le moment d'émettre le chunk suivant
    pub async fn pace(&mut self, bytes: usize, byte_rate: u64) {
        if self.preroll_remaining > 0 {
            self.preroll_remaining -= 1;
            return;
        }
        if byte_rate == 0 {
            return;
        }

        let step = Duration::from_secs_f64(bytes as f64 / byte_rate as f64);
        let now = Instant::now();
        let deadline = match self.deadline {
            Some(previous) if previous + MAX_LAG >= now => previous + step,
            _ => now + step,
        };
        self.deadline = Some(deadline);
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_preroll_then_real_time() {
        let mut pacer = Pacer::new(4);
        let start = Instant::now();

        for _ in 0..4 {
            pacer.pace(1600, 16_000).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        for _ in 0..10 {
            pacer.pace(1600, 16_000).await;
        }
        let elapsed = start.elapsed().as_secs_f64();
        assert!((elapsed - 1.0).abs() < 0.01, "elapsed {}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_time_does_not_drift() {
        let mut pacer = Pacer::new(0);
        let start = Instant::now();

        for _ in 0..10 {
            // Simule 20 ms de travail par chunk de 100 ms
            tokio::time::sleep(Duration::from_millis(20)).await;
            pacer.pace(1600, 16_000).await;
        }
        let elapsed = start.elapsed().as_secs_f64();
        assert!((elapsed - 1.0).abs() < 0.03, "elapsed {}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_lag_is_not_caught_up() {
        let mut pacer = Pacer::new(0);
        pacer.pace(1600, 16_000).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let resumed = Instant::now();
        pacer.pace(1600, 16_000).await;
        assert!(resumed.elapsed() >= Duration::from_millis(100));
    }
}
