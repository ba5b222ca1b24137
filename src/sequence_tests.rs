//! Unit tests for the sequence module

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::sequence::{sample_rate_from_json, sample_rate_from_text, Sequence, SequenceFormat};

    #[test]
    fn test_format_parsing() {
        assert_eq!("text".parse::<SequenceFormat>().unwrap(), SequenceFormat::Text);
        assert_eq!("json".parse::<SequenceFormat>().unwrap(), SequenceFormat::Json);

        let err = "midi".parse::<SequenceFormat>().unwrap_err();
        assert_eq!(err, EngineError::InvalidInput("Unsupported format: midi".to_string()));
        assert!("TEXT".parse::<SequenceFormat>().is_err());
    }

    #[test]
    fn test_empty_content_is_rejected() {
        let err = Sequence::new("", SequenceFormat::Text).unwrap_err();
        assert_eq!(err, EngineError::InvalidInput("Input is required".to_string()));
    }

    #[test]
    fn test_text_sample_rate_directive() {
        assert_eq!(sample_rate_from_text("@samplerate 48000\nc4 d4"), Some(48000));
        assert_eq!(sample_rate_from_text("  @samplerate   22050  "), Some(22050));
        assert_eq!(sample_rate_from_text("c4 d4 e4"), None);
    }

    #[test]
    fn test_text_first_valid_directive_wins() {
        let text = "@samplerate fast\n@samplerate 32000\n@samplerate 48000";
        assert_eq!(sample_rate_from_text(text), Some(32000));
    }

    #[test]
    fn test_text_directive_must_start_line() {
        assert_eq!(sample_rate_from_text("note @samplerate 48000"), None);
    }

    #[test]
    fn test_text_zero_rate_is_ignored() {
        assert_eq!(sample_rate_from_text("@samplerate 0"), None);
        let sequence = Sequence::new("@samplerate 0", SequenceFormat::Text).unwrap();
        assert_eq!(sequence.sample_rate(), 44100);
    }

    #[test]
    fn test_json_sample_rate() {
        assert_eq!(
            sample_rate_from_json(br#"{"options": {"samplerate": 96000}, "tracks": []}"#),
            Some(96000)
        );
        assert_eq!(sample_rate_from_json(br#"{"tracks": []}"#), None);
        assert_eq!(sample_rate_from_json(br#"{"options": {}}"#), None);
        assert_eq!(sample_rate_from_json(br#"{"options": {"samplerate": "48000"}}"#), None);
        assert_eq!(sample_rate_from_json(b"not json"), None);
    }

    #[test]
    fn test_json_integral_float_sample_rate() {
        assert_eq!(
            sample_rate_from_json(br#"{"options": {"samplerate": 48000.0}}"#),
            Some(48000)
        );
        assert_eq!(sample_rate_from_json(br#"{"options": {"samplerate": 48000.5}}"#), None);
        assert_eq!(sample_rate_from_json(br#"{"options": {"samplerate": -44100}}"#), None);
        assert_eq!(sample_rate_from_json(br#"{"options": {"samplerate": 1e12}}"#), None);

        let sequence =
            Sequence::new(r#"{"options": {"samplerate": 22050.0}}"#, SequenceFormat::Json).unwrap();
        assert_eq!(sequence.sample_rate(), 22050);
    }

    #[test]
    fn test_sequence_defaults_to_44100() {
        let json = Sequence::new(r#"{"tracks": []}"#, SequenceFormat::Json).unwrap();
        assert_eq!(json.sample_rate(), 44100);

        let text = Sequence::new("c4 e4 g4", SequenceFormat::Text).unwrap();
        assert_eq!(text.sample_rate(), 44100);
    }

    #[test]
    fn test_sequence_keeps_content() {
        let sequence = Sequence::new("@samplerate 48000", SequenceFormat::Text).unwrap();
        assert_eq!(sequence.content(), b"@samplerate 48000");
        assert_eq!(sequence.format(), SequenceFormat::Text);
        assert_eq!(sequence.sample_rate(), 48000);
    }
}
