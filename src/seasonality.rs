use crate::schema::SeasonalitySettings;
use chrono::NaiveDate;
use std::f64::consts::PI;

pub const WEEKLY_PERIOD_DAYS: f64 = 7.0;
pub const YEARLY_PERIOD_DAYS: f64 = 365.25;
pub const WEEKLY_FOURIER_ORDER: usize = 3;
pub const YEARLY_FOURIER_ORDER: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalComponent {
    pub name: &'static str,
    pub period_days: f64,
    pub fourier_order: usize,
}

impl SeasonalComponent {
    pub fn weekly() -> Self {
        Self {
            name: "weekly",
            period_days: WEEKLY_PERIOD_DAYS,
            fourier_order: WEEKLY_FOURIER_ORDER,
        }
    }

    pub fn yearly() -> Self {
        Self {
            name: "yearly",
            period_days: YEARLY_PERIOD_DAYS,
            fourier_order: YEARLY_FOURIER_ORDER,
        }
    }

    /// Two columns (sin, cos) per Fourier order.
    pub fn width(&self) -> usize {
        2 * self.fourier_order
    }
}

pub fn components_for(settings: SeasonalitySettings) -> Vec<SeasonalComponent> {
    let mut components = Vec::new();
    if settings.weekly {
        components.push(SeasonalComponent::weekly());
    }
    if settings.yearly {
        components.push(SeasonalComponent::yearly());
    }
    components
}

/// Days since the Unix epoch, so that every series shares the same seasonal phase.
pub fn epoch_days(date: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (date - epoch).num_days() as f64
}

/// Fourier terms for every component at `date`, laid out component by
/// component as `sin(2πkt/P), cos(2πkt/P)` for `k = 1..=order`.
pub fn fourier_features(date: NaiveDate, components: &[SeasonalComponent]) -> Vec<f64> {
    let t = epoch_days(date);
    let mut features = Vec::with_capacity(components.iter().map(|c| c.width()).sum());

    for component in components {
        for k in 1..=component.fourier_order {
            let angle = 2.0 * PI * k as f64 * t / component.period_days;
            features.push(angle.sin());
            features.push(angle.cos());
        }
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_follow_settings() {
        let both = components_for(SeasonalitySettings {
            weekly: true,
            yearly: true,
        });
        assert_eq!(both.len(), 2);
        assert_eq!(both.iter().map(|c| c.width()).sum::<usize>(), 26);

        assert!(components_for(SeasonalitySettings::NONE).is_empty());
    }

    #[test]
    fn test_weekly_features_repeat_every_seven_days() {
        let components = vec![SeasonalComponent::weekly()];
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let next_monday = NaiveDate::from_ymd_opt(2024, 3, 18).unwrap();

        let a = fourier_features(monday, &components);
        let b = fourier_features(next_monday, &components);
        assert_eq!(a.len(), 6);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_features_are_bounded() {
        let components = components_for(SeasonalitySettings {
            weekly: true,
            yearly: true,
        });
        let date = NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
        assert!(fourier_features(date, &components)
            .iter()
            .all(|v| v.abs() <= 1.0));
    }
}
