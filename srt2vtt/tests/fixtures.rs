use pretty_assertions::assert_eq;

use srt2vtt::convert;

#[test]
fn fixtures_match_expected_output() {
    let cases = [
        (
            "en/017",
            include_str!("fixtures/srt/en/017.srt"),
            include_str!("fixtures/vtt/en/017.vtt"),
        ),
        (
            "jp/017",
            include_str!("fixtures/srt/jp/017.srt"),
            include_str!("fixtures/vtt/jp/017.vtt"),
        ),
    ];

    for (name, srt, expected) in cases {
        assert_eq!(convert(srt), expected, "fixture mismatch: {name}");
    }
}

