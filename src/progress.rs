//! Conversion of (stage, within-stage percent) reports into one overall percent.
//!
//! Weights are fixed: speech-to-text fills the first third, translation the
//! second, and speech synthesis the remaining 34 points so that a finished
//! synthesis stage lands exactly on 100.

use crate::task::Stage;

const STT_BAND: (f64, f64) = (0.0, 0.33);
const TRANSLATION_BAND: (f64, f64) = (33.0, 0.33);
const TTS_BAND: (f64, f64) = (66.0, 0.34);

/// Overall percent for a stage report. Pure; callers round only for display.
///
/// No stage, or a stage without a weight band, yields 0.
pub fn normalize(stage: Option<&Stage>, stage_progress: f64) -> f64 {
    let Some((base, weight)) = stage.and_then(band) else {
        return 0.0;
    };

    let stage_progress = if stage_progress.is_finite() {
        stage_progress.clamp(0.0, 100.0)
    } else {
        0.0
    };

    (base + stage_progress * weight).clamp(0.0, 100.0)
}

/// Round an overall percent for display.
pub fn display_percent(overall: f64) -> u8 {
    overall.clamp(0.0, 100.0).round() as u8
}

/// Human-readable label for the stage currently being worked on.
pub fn stage_label(stage: Option<&Stage>) -> String {
    match stage {
        None => "Preparing...".to_string(),
        Some(Stage::Stt) => "Converting speech to text...".to_string(),
        Some(Stage::Translation) => "Translating text...".to_string(),
        Some(Stage::Tts) => "Synthesizing speech...".to_string(),
        Some(Stage::Other(name)) => format!("Working on {}...", name),
    }
}

fn band(stage: &Stage) -> Option<(f64, f64)> {
    match stage {
        Stage::Stt => Some(STT_BAND),
        Stage::Translation => Some(TRANSLATION_BAND),
        Stage::Tts => Some(TTS_BAND),
        Stage::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn weighted_stage() -> impl Strategy<Value = Stage> {
        prop_oneof![Just(Stage::Stt), Just(Stage::Translation), Just(Stage::Tts)]
    }

    #[test]
    fn test_no_stage_is_zero() {
        assert_eq!(normalize(None, 0.0), 0.0);
        assert_eq!(normalize(None, 80.0), 0.0);
    }

    #[test]
    fn test_stage_formulas() {
        assert!((normalize(Some(&Stage::Stt), 50.0) - 16.5).abs() < 1e-9);
        assert!((normalize(Some(&Stage::Translation), 50.0) - 49.5).abs() < 1e-9);
        assert!((normalize(Some(&Stage::Tts), 50.0) - 83.0).abs() < 1e-9);
        assert!((normalize(Some(&Stage::Tts), 100.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stage_boundaries_are_continuous() {
        assert_eq!(
            display_percent(normalize(Some(&Stage::Stt), 100.0)),
            display_percent(normalize(Some(&Stage::Translation), 0.0))
        );
        assert_eq!(
            display_percent(normalize(Some(&Stage::Translation), 100.0)),
            display_percent(normalize(Some(&Stage::Tts), 0.0))
        );
    }

    #[test]
    fn test_unweighted_stage_is_zero() {
        assert_eq!(normalize(Some(&Stage::Other("merge".into())), 70.0), 0.0);
    }

    #[test]
    fn test_display_rounding() {
        let overall = normalize(Some(&Stage::Stt), 50.0);
        assert!(matches!(display_percent(overall), 16 | 17));
        assert_eq!(display_percent(-4.0), 0);
        assert_eq!(display_percent(250.0), 100);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(stage_label(None), "Preparing...");
        assert_eq!(stage_label(Some(&Stage::Tts)), "Synthesizing speech...");
        assert_eq!(stage_label(Some(&Stage::Other("merge".into()))), "Working on merge...");
    }

    proptest! {
        #[test]
        fn normalized_percent_stays_in_range(stage in weighted_stage(), p in 0.0f64..=100.0) {
            let overall = normalize(Some(&stage), p);
            prop_assert!((0.0..=100.0).contains(&overall));
        }

        #[test]
        fn normalized_percent_is_monotonic_within_stage(
            stage in weighted_stage(),
            a in 0.0f64..=100.0,
            b in 0.0f64..=100.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(normalize(Some(&stage), lo) <= normalize(Some(&stage), hi));
        }

        #[test]
        fn normalize_is_idempotent(stage in weighted_stage(), p in 0.0f64..=100.0) {
            prop_assert_eq!(normalize(Some(&stage), p), normalize(Some(&stage), p));
        }
    }
}
