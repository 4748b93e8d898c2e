// tests/property/codec_roundtrip_test.rs

//! Property-based tests for the decode and format codecs.

use keydeck::core::convert::{DecodeKind, FormatKind, convert_to, save_as};
use proptest::prelude::*;

const CODECS: [DecodeKind; 7] = [
    DecodeKind::None,
    DecodeKind::Base64,
    DecodeKind::GZip,
    DecodeKind::Deflate,
    DecodeKind::ZStd,
    DecodeKind::Brotli,
    DecodeKind::Msgpack,
];

/// Plain words, JSON-shaped text, control characters and arbitrary unicode.
fn stored_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,200}",
        r#"\{"[a-z]{1,8}": ?[0-9]{1,4}(\.[0-9]e2)?\}"#,
        r"\[[0-9]{1,3}(, ?[0-9]{1,3}){0,5}\]",
        "[\\x00-\\x1f\\x7f a-z]{0,100}",
        ".{0,100}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_codecs_roundtrip_arbitrary_bytes(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        kind in prop::sample::select(CODECS.to_vec())
    ) {
        let encoded = kind.encode(&data).unwrap();
        prop_assert_eq!(kind.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_saved_text_reads_back_unchanged(
        text in stored_text(),
        kind in prop::sample::select(CODECS.to_vec())
    ) {
        let stored = save_as(&text, Some(FormatKind::Raw), Some(kind)).unwrap();
        let result = convert_to(&stored, Some(kind), Some(FormatKind::Raw));
        prop_assert_eq!(result.decode, kind);
        prop_assert_eq!(result.value, text);
    }

    #[test]
    fn test_saved_hex_reads_back_unchanged(
        data in prop::collection::vec(any::<u8>(), 0..256),
        kind in prop::sample::select(CODECS.to_vec())
    ) {
        let rendered = FormatKind::Hex.render(&data).unwrap();
        let stored = save_as(&rendered, Some(FormatKind::Hex), Some(kind)).unwrap();
        let result = convert_to(&stored, Some(kind), Some(FormatKind::Hex));
        prop_assert_eq!(result.value, rendered);
    }

    #[test]
    fn test_hex_and_binary_renders_parse_back(
        data in prop::collection::vec(any::<u8>(), 0..512),
        format in prop::sample::select(vec![FormatKind::Hex, FormatKind::Binary])
    ) {
        let rendered = format.render(&data).unwrap();
        prop_assert_eq!(format.parse(&rendered).unwrap(), data);
    }

    #[test]
    fn test_read_path_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let result = convert_to(&data, None, None);
        if result.decode == DecodeKind::None && result.format == FormatKind::Hex {
            prop_assert_eq!(FormatKind::Hex.parse(&result.value).unwrap(), data);
        }
    }
}
