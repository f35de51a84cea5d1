// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn state_label_covers_every_variant() {
    assert_eq!(state_label(ProcState::Offline), "offline");
    assert_eq!(state_label(ProcState::Starting), "starting");
    assert_eq!(state_label(ProcState::Running), "running");
    assert_eq!(state_label(ProcState::Stopping), "stopping");
}

#[test]
fn output_format_defaults_to_text() {
    assert_eq!(OutputFormat::default(), OutputFormat::Text);
}
