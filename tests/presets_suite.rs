use reactive_visuals::group::{CONTROL_COUNT, control_name};
use reactive_visuals::preset::{
    PresetBank, PresetError, ReactivePreset, builtin_presets, find_preset,
};

const ONE_PRESET: &str = r#"
    # hand-written bank
    preset Kick Drum
    enabled 1 0 0 0 0 1 0 0 0 0 0 0 0 0 0
    sensitivity 2 1 1 1 1 1.5 1 1 1 1 1 1 1 1 1
    mix 1 0 0 0
"#;

#[test]
fn builtin_presets_are_valid_and_distinct() {
    let bank = PresetBank::builtin();
    bank.validate().expect("builtins validate");
    assert!(bank.presets().len() >= 5);
    assert!(bank.names().contains(&"Bass Dominant"));
    for p in bank.presets() {
        assert!(!p.name.trim().is_empty());
        assert!(p.enabled.iter().any(|&e| e), "{} enables nothing", p.name);
    }
}

#[test]
fn control_slots_have_names() {
    for slot in 0..CONTROL_COUNT {
        assert!(control_name(slot).is_some(), "slot {slot}");
    }
    assert_eq!(control_name(0), Some("bass"));
    assert_eq!(control_name(5), Some("size"));
    assert_eq!(control_name(CONTROL_COUNT), None);
}

#[test]
fn parses_a_hand_written_bank() {
    let bank = PresetBank::parse(ONE_PRESET).expect("parse");
    let p = &bank.presets()[0];
    assert_eq!(p.name, "Kick Drum");
    assert!(p.enabled[0] && p.enabled[5]);
    assert_eq!(p.enabled.iter().filter(|&&e| e).count(), 2);
    assert_eq!(p.sensitivities[0], 2.0);
    assert_eq!(p.sensitivities[5], 1.5);
    assert_eq!(p.frequency_mix, [true, false, false, false]);
}

#[test]
fn text_form_reparses_to_the_same_bank() {
    let bank = PresetBank::builtin();
    let reparsed = PresetBank::parse(&bank.to_text()).expect("reparse");
    assert_eq!(reparsed, bank);
}

#[test]
fn fine_grained_sensitivities_survive_text() {
    let mut p = ReactivePreset::empty("Fine Tune");
    p.enabled[0] = true;
    p.sensitivities[0] = 1.23456;
    p.sensitivities[14] = 0.000_1;
    let bank = PresetBank::from_presets(vec![p]).expect("valid");
    let reparsed = PresetBank::parse(&bank.to_text()).expect("reparse");
    assert_eq!(reparsed.presets()[0].sensitivities[0], 1.23456);
    assert_eq!(reparsed, bank);
}

#[test]
fn names_that_cannot_be_written_back_are_rejected() {
    for bad in ["Kick #2", "two\nlines", " padded", ""] {
        let res = PresetBank::from_presets(vec![ReactivePreset::empty(bad)]);
        assert!(
            matches!(res, Err(PresetError::InvalidName(ref n)) if n == bad),
            "{bad:?} accepted"
        );
    }
}

#[test]
fn missing_mix_defaults_to_off() {
    let text = ONE_PRESET.replace("mix 1 0 0 0", "");
    let bank = PresetBank::parse(&text).expect("parse");
    assert_eq!(bank.presets()[0].frequency_mix, [false; 4]);
}

#[test]
fn rejects_malformed_banks() {
    assert!(matches!(PresetBank::parse(""), Err(PresetError::Empty)));
    assert!(matches!(
        PresetBank::parse("enabled 1 1 1"),
        Err(PresetError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        PresetBank::parse("preset a\nenabled 1 0\n"),
        Err(PresetError::Parse { line: 2, .. })
    ));
    assert!(matches!(
        PresetBank::parse(&ONE_PRESET.replace("mix 1 0 0 0", "mix 1 0 0 maybe")),
        Err(PresetError::Parse { .. })
    ));
    assert!(matches!(
        PresetBank::parse(&ONE_PRESET.replace("mix", "blend")),
        Err(PresetError::Parse { .. })
    ));
    assert!(matches!(
        PresetBank::parse(&ONE_PRESET.replace("sensitivity 2", "sensitivity -2")),
        Err(PresetError::InvalidSensitivity { control: "bass", .. })
    ));
    assert!(matches!(
        PresetBank::parse(&format!("{ONE_PRESET}\n{ONE_PRESET}")),
        Err(PresetError::DuplicatePreset(_))
    ));

    let no_sens = ONE_PRESET
        .lines()
        .filter(|l| !l.trim_start().starts_with("sensitivity"))
        .collect::<Vec<_>>()
        .join("\n");
    assert!(matches!(
        PresetBank::parse(&no_sens),
        Err(PresetError::MissingField {
            field: "sensitivity",
            ..
        })
    ));
}

#[test]
fn lookup_by_index_exact_name_or_substring() {
    let presets = builtin_presets();
    assert_eq!(find_preset(&presets, "1").map(|p| p.name.as_str()), Some(presets[1].name.as_str()));
    assert_eq!(
        find_preset(&presets, "bass dominant").map(|p| p.name.as_str()),
        Some("Bass Dominant")
    );
    assert_eq!(
        find_preset(&presets, "sparkle").map(|p| p.name.as_str()),
        Some("Treble Sparkle")
    );
    assert!(find_preset(&presets, "").is_none());
    assert!(find_preset(&presets, "999").is_none());
    assert!(find_preset(&presets, "no such preset").is_none());
}

#[test]
fn loaded_bank_can_be_topped_up_with_builtins() {
    let dir = std::env::temp_dir().join(format!("reactive_visuals_presets_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("tmp dir");
    let path = dir.join("bank.txt");
    std::fs::write(&path, ONE_PRESET.replace("Kick Drum", "calm")).expect("write");

    let mut bank = PresetBank::load(&path).expect("load");
    bank.merge_builtins();
    let names = bank.names();
    assert_eq!(names[0], "calm");
    assert!(!names.contains(&"Calm"), "builtin with a taken name was added");
    assert!(names.contains(&"Balanced"));
    bank.validate().expect("merged bank validates");

    assert!(matches!(
        PresetBank::load(dir.join("missing.txt")),
        Err(PresetError::Io(_))
    ));
    let _ = std::fs::remove_dir_all(&dir);
}
