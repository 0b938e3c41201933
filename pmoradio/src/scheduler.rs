//! Résolution « heure murale → piste en cours »
//!
//! La programmation est une fonction pure de `(catalogue, epoch, maintenant)` :
//! deux processus indépendants, ou un processus redémarré, calculent la même
//! piste au même décalage sans aucun état persistant.
//!
//! Le temps écoulé depuis l'epoch est découpé en *itérations* de durée égale
//! à la durée totale du catalogue. Chaque itération joue toutes les pistes une
//! fois, dans un ordre mélangé avec l'indice d'itération comme graine.
//!
//! Si une itération commencerait par la dernière piste de la précédente, les
//! `n - 1` premières positions sont re-mélangées avec une graine perturbée
//! (`iteration * 1000 + tentative`), au plus [`MAX_REPEAT_ATTEMPTS`] fois,
//! après quoi la répétition est acceptée. La dernière piste ne bouge jamais :
//! l'ordre joué se termine donc toujours comme le mélange brut, et la
//! comparaison avec le mélange brut de l'itération précédente suffit. Chaque
//! résolution coûte quelques mélanges, quel que soit le temps écoulé.
//!
//! Avec deux pistes, le seul enchaînement sans répétition reprend l'ordre de
//! l'itération 0 à chaque itération.

use crate::catalog::{Catalog, Track};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use pmocache::CachePlan;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{error, trace};

/// Nombre maximal de re-mélanges pour éviter une répétition en bord d'itération
pub const MAX_REPEAT_ATTEMPTS: u64 = 100;

/// Source de l'heure courante
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Horloge système
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Position de lecture à un instant donné
#[derive(Debug, Clone)]
pub struct Resolution {
    pub current: Arc<Track>,
    /// Secondes écoulées dans la piste courante
    pub offset_seconds: f64,
    pub iteration: u64,
    /// Rang de la piste dans l'ordre de l'itération
    pub position: usize,
    pub previous: Arc<Track>,
    pub next: Arc<Track>,
    pub next_next: Arc<Track>,
    pub remaining_seconds: f64,
    pub catalog_version: u64,
}

impl Resolution {
    /// Position dans le fichier correspondant au décalage
    pub fn byte_offset(&self) -> u64 {
        (self.offset_seconds * self.current.byte_rate as f64).floor() as u64
    }

    /// Fichiers nécessaires : courante + `prefetch_depth` suivantes, précédente à évincer
    pub fn cache_plan(&self, prefetch_depth: usize) -> CachePlan {
        let upcoming = [&self.next, &self.next_next]
            .into_iter()
            .take(prefetch_depth.clamp(1, 2))
            .map(|t| t.media_ref.clone())
            .filter(|id| id != &self.current.media_ref)
            .collect();
        CachePlan {
            current: self.current.media_ref.clone(),
            upcoming,
            previous: Some(self.previous.media_ref.clone())
                .filter(|id| id != &self.current.media_ref),
        }
    }
}

/// Programmateur déterministe
#[derive(Debug, Clone)]
pub struct Scheduler {
    epoch: DateTime<Utc>,
}

fn seeded_shuffle(len: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    order
}

/// Ordre joué pendant une itération (indices dans `catalog.ids()`)
fn effective_order(len: usize, iteration: u64) -> Vec<usize> {
    if len == 2 {
        return seeded_shuffle(len, 0);
    }
    let mut order = seeded_shuffle(len, iteration);
    if iteration == 0 || len < 2 {
        return order;
    }

    let previous_last = seeded_shuffle(len, iteration - 1)[len - 1];
    let mut attempt = 1;
    while order[0] == previous_last && attempt <= MAX_REPEAT_ATTEMPTS {
        let seed = iteration.wrapping_mul(1000).wrapping_add(attempt);
        order[..len - 1].shuffle(&mut StdRng::seed_from_u64(seed));
        attempt += 1;
    }
    if order[0] == previous_last {
        trace!(iteration, "Accepting boundary repeat");
    }
    order
}

impl Scheduler {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self { epoch }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Secondes écoulées depuis l'epoch, ramenées à 0 avant l'epoch
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.epoch)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Ordre de lecture (ids) d'une itération
    pub fn order_for_iteration(&self, catalog: &Catalog, iteration: u64) -> Vec<String> {
        effective_order(catalog.len(), iteration)
            .iter()
            .map(|&i| catalog.ids()[i].clone())
            .collect()
    }

    /// Résout la piste en cours à l'instant `now`
    pub fn resolve(&self, catalog: &Catalog, now: DateTime<Utc>) -> Result<Resolution> {
        let total = catalog.total_duration();
        if catalog.is_empty() || !(total > 0.0) {
            return Err(Error::Config(
                "cannot schedule an empty catalog or a zero total duration".into(),
            ));
        }

        let elapsed = self.elapsed_seconds(now);
        let iteration = (elapsed / total).floor() as u64;
        let time_into_iteration = (elapsed - iteration as f64 * total).max(0.0);

        let order = effective_order(catalog.len(), iteration);
        let track_at = |rank: usize| catalog.track_at(rank);

        let mut sum = 0.0;
        let mut found = None;
        for (position, &index) in order.iter().enumerate() {
            let duration = track_at(index).duration_seconds;
            if sum + duration > time_into_iteration {
                found = Some((position, time_into_iteration - sum));
                break;
            }
            sum += duration;
        }

        let Some((position, offset_seconds)) = found else {
            error!(
                iteration,
                time_into_iteration, total, "Schedule walk overshot the iteration"
            );
            return Err(Error::ScheduleMiss {
                iteration,
                time_into_iteration,
                total_duration: total,
            });
        };

        let len = order.len();
        let current = track_at(order[position]).clone();

        let previous = if position > 0 {
            track_at(order[position - 1])
        } else if iteration > 0 {
            let before = effective_order(len, iteration - 1);
            track_at(before[len - 1])
        } else {
            track_at(order[len - 1])
        }
        .clone();

        let following = |k: usize| -> Arc<Track> {
            if k < len {
                track_at(order[k]).clone()
            } else {
                let after = effective_order(len, iteration + 1);
                track_at(after[(k - len) % len]).clone()
            }
        };
        let next = following(position + 1);
        let next_next = following(position + 2);

        Ok(Resolution {
            remaining_seconds: (current.duration_seconds - offset_seconds).max(0.0),
            current,
            offset_seconds,
            iteration,
            position,
            previous,
            next,
            next_next,
            catalog_version: catalog.version(),
        })
    }
}
