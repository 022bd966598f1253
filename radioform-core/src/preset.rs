//! EQ preset and band types, plus the validation `apply_preset` requires
//! before installing a preset onto the engine.
//!
//! Shape matches the preset JSON contract: deserialization is permissive
//! (any finite f64/i32 parses), validation is strict and happens afterward,
//! exactly the split the spec calls for in §6/§8 invariant 4.

use crate::error::{PresetError, PresetResult};
use serde::{Deserialize, Serialize};

/// Maximum bands the default EQ's biquad cascade is sized for.
pub const RADIOFORM_MAX_BANDS: usize = 10;

/// Wire-tagged as `int_enum` per the preset JSON contract (spec.md §6), not a
/// string — ordinal assigned in the order §6 lists the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum FilterKind {
    Peak,
    LowShelf,
    HighShelf,
    LowPass,
    HighPass,
    Notch,
    BandPass,
}

impl TryFrom<i32> for FilterKind {
    type Error = PresetError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FilterKind::Peak),
            1 => Ok(FilterKind::LowShelf),
            2 => Ok(FilterKind::HighShelf),
            3 => Ok(FilterKind::LowPass),
            4 => Ok(FilterKind::HighPass),
            5 => Ok(FilterKind::Notch),
            6 => Ok(FilterKind::BandPass),
            other => Err(PresetError::UnknownFilterKind(other)),
        }
    }
}

impl From<FilterKind> for i32 {
    fn from(value: FilterKind) -> Self {
        match value {
            FilterKind::Peak => 0,
            FilterKind::LowShelf => 1,
            FilterKind::HighShelf => 2,
            FilterKind::LowPass => 3,
            FilterKind::HighPass => 4,
            FilterKind::Notch => 5,
            FilterKind::BandPass => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub frequency_hz: f64,
    pub gain_db: f64,
    #[serde(rename = "q_factor")]
    pub q: f64,
    #[serde(rename = "type")]
    pub filter_kind: FilterKind,
    pub enabled: bool,
}

impl Band {
    pub const FREQUENCY_RANGE: (f64, f64) = (20.0, 20_000.0);
    pub const GAIN_RANGE: (f64, f64) = (-12.0, 12.0);
    pub const Q_RANGE: (f64, f64) = (0.1, 10.0);

    /// A disabled, neutral band used to pad the cascade and for `set_flat`.
    pub fn flat() -> Self {
        Self {
            frequency_hz: 1000.0,
            gain_db: 0.0,
            q: 1.0,
            filter_kind: FilterKind::Peak,
            enabled: false,
        }
    }

    fn validate(&self, index: usize) -> PresetResult<()> {
        if !self.frequency_hz.is_finite() {
            return Err(PresetError::NonFinite { index, field: "frequency_hz" });
        }
        if !self.gain_db.is_finite() {
            return Err(PresetError::NonFinite { index, field: "gain_db" });
        }
        if !self.q.is_finite() {
            return Err(PresetError::NonFinite { index, field: "q" });
        }
        let (fmin, fmax) = Self::FREQUENCY_RANGE;
        if self.frequency_hz < fmin || self.frequency_hz > fmax {
            return Err(PresetError::FrequencyOutOfRange { index, value: self.frequency_hz });
        }
        let (gmin, gmax) = Self::GAIN_RANGE;
        if self.gain_db < gmin || self.gain_db > gmax {
            return Err(PresetError::GainOutOfRange { index, value: self.gain_db });
        }
        let (qmin, qmax) = Self::Q_RANGE;
        if self.q < qmin || self.q > qmax {
            return Err(PresetError::QOutOfRange { index, value: self.q });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub bands: Vec<Band>,
    pub preamp_db: f64,
    pub limiter_enabled: bool,
    pub limiter_threshold_db: f64,
}

impl Preset {
    pub const PREAMP_RANGE: (f64, f64) = (-12.0, 12.0);
    pub const LIMITER_THRESHOLD_RANGE: (f64, f64) = (-6.0, 0.0);

    /// Flat preset: no bands enabled, 0 dB preamp, limiter off. Transparent
    /// per invariant 5/scenario S4.
    pub fn flat() -> Self {
        Self {
            name: "Flat".to_string(),
            bands: Vec::new(),
            preamp_db: 0.0,
            limiter_enabled: false,
            limiter_threshold_db: -0.1,
        }
    }

    /// Validate every field against its declared range, rejecting non-finite
    /// values. Returns the first violation found, band order first.
    pub fn validate(&self) -> PresetResult<()> {
        if self.bands.len() > RADIOFORM_MAX_BANDS {
            return Err(PresetError::TooManyBands {
                count: self.bands.len(),
                max: RADIOFORM_MAX_BANDS,
            });
        }
        for (index, band) in self.bands.iter().enumerate() {
            band.validate(index)?;
        }
        if !self.preamp_db.is_finite() {
            return Err(PresetError::NonFinite { index: usize::MAX, field: "preamp_db" });
        }
        let (pmin, pmax) = Self::PREAMP_RANGE;
        if self.preamp_db < pmin || self.preamp_db > pmax {
            return Err(PresetError::PreampOutOfRange(self.preamp_db));
        }
        if !self.limiter_threshold_db.is_finite() {
            return Err(PresetError::NonFinite { index: usize::MAX, field: "limiter_threshold_db" });
        }
        let (lmin, lmax) = Self::LIMITER_THRESHOLD_RANGE;
        if self.limiter_threshold_db < lmin || self.limiter_threshold_db > lmax {
            return Err(PresetError::LimiterThresholdOutOfRange(self.limiter_threshold_db));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_preset_validates() {
        Preset::flat().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_gain() {
        let mut p = Preset::flat();
        p.bands.push(Band {
            gain_db: 20.0,
            ..Band::flat()
        });
        assert!(matches!(p.validate(), Err(PresetError::GainOutOfRange { .. })));
    }

    #[test]
    fn rejects_non_finite_frequency() {
        let mut p = Preset::flat();
        p.bands.push(Band {
            frequency_hz: f64::NAN,
            ..Band::flat()
        });
        assert!(matches!(p.validate(), Err(PresetError::NonFinite { .. })));
    }

    #[test]
    fn rejects_too_many_bands() {
        let mut p = Preset::flat();
        for _ in 0..=RADIOFORM_MAX_BANDS {
            p.bands.push(Band::flat());
        }
        assert!(matches!(p.validate(), Err(PresetError::TooManyBands { .. })));
    }

    #[test]
    fn json_roundtrip() {
        let mut p = Preset::flat();
        p.bands.push(Band {
            frequency_hz: 1000.0,
            gain_db: 6.0,
            q: 1.0,
            filter_kind: FilterKind::Peak,
            enabled: true,
        });
        let json = serde_json::to_string(&p).unwrap();
        let back: Preset = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn deserializes_the_literal_wire_contract() {
        let json = r#"{
            "name": "Bass Boost",
            "preamp_db": 0.0,
            "limiter_enabled": false,
            "limiter_threshold_db": -0.1,
            "bands": [
                { "frequency_hz": 80.0, "gain_db": 4.0, "q_factor": 0.9, "type": 1, "enabled": true }
            ]
        }"#;
        let p: Preset = serde_json::from_str(json).unwrap();
        assert_eq!(p.bands[0].q, 0.9);
        assert_eq!(p.bands[0].filter_kind, FilterKind::LowShelf);
    }

    #[test]
    fn rejects_unknown_filter_kind_ordinal() {
        let json = r#"{"frequency_hz":80.0,"gain_db":0.0,"q_factor":1.0,"type":99,"enabled":true}"#;
        let result: Result<Band, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
