use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{local_extrema, mean, within, AnalyzerConfig};
use crate::models::PricePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelType {
    Support,
    Resistance,
}

/// A horizontal support or resistance level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    /// 0–100.
    pub strength: Decimal,
    pub touches: u32,
    pub level_type: LevelType,
}

/// Support/resistance from 5-point local extrema.
///
/// Strength = min(touches × 15, 60) + min(volume ratio × 30, 40), where the
/// volume ratio is the extremum's volume over the series' mean volume.
/// Same-type levels within `merge_tolerance` collapse into one (averaged
/// price, strongest strength). Strongest `max_levels` are returned.
pub fn find_levels(data: &[PricePoint], config: &AnalyzerConfig) -> Vec<PriceLevel> {
    if data.len() < config.level_min_samples.max(5) {
        return Vec::new();
    }

    let prices: Vec<Decimal> = data.iter().map(|p| p.price).collect();
    let volumes: Vec<Decimal> = data.iter().map(|p| p.volume).collect();
    let mean_volume = mean(&volumes);

    let (maxima, minima) = local_extrema(&prices, 2);

    let candidate = |i: usize, level_type: LevelType| {
        let level = prices[i];
        let touches = prices
            .iter()
            .filter(|&&p| within(p, level, config.touch_tolerance))
            .count() as u32;
        let volume_ratio = if mean_volume > Decimal::ZERO {
            volumes[i] / mean_volume
        } else {
            Decimal::ZERO
        };
        let touch_score = (Decimal::from(touches) * Decimal::from(15)).min(Decimal::from(60));
        let volume_score = (volume_ratio * Decimal::from(30)).min(Decimal::from(40));

        PriceLevel {
            price: level,
            strength: touch_score + volume_score,
            touches,
            level_type,
        }
    };

    let mut candidates: Vec<PriceLevel> = maxima
        .iter()
        .map(|&i| candidate(i, LevelType::Resistance))
        .chain(minima.iter().map(|&i| candidate(i, LevelType::Support)))
        .collect();
    candidates.sort_by(|a, b| a.price.cmp(&b.price));

    let mut merged: Vec<PriceLevel> = Vec::new();
    for c in candidates {
        let existing = merged.iter_mut().find(|m| {
            m.level_type == c.level_type && within(c.price, m.price, config.merge_tolerance)
        });
        match existing {
            Some(m) => {
                m.price = (m.price + c.price) / Decimal::TWO;
                m.strength = m.strength.max(c.strength);
                m.touches = m.touches.max(c.touches);
            }
            None => merged.push(c),
        }
    }

    merged.sort_by(|a, b| b.strength.cmp(&a.strength));
    merged.truncate(config.max_levels);
    merged
}

/// Closest support strictly below `price`.
pub fn nearest_support_below(levels: &[PriceLevel], price: Decimal) -> Option<&PriceLevel> {
    levels
        .iter()
        .filter(|l| l.level_type == LevelType::Support && l.price < price)
        .max_by(|a, b| a.price.cmp(&b.price))
}

/// Closest resistance strictly above `price`.
pub fn nearest_resistance_above(levels: &[PriceLevel], price: Decimal) -> Option<&PriceLevel> {
    levels
        .iter()
        .filter(|l| l.level_type == LevelType::Resistance && l.price > price)
        .min_by(|a, b| a.price.cmp(&b.price))
}
