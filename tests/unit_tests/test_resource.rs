// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use en50221_session_rs::resource::ResourceId;

#[test]
fn packing_matches_en50221_layout() {
    let id = ResourceId::new(1, 1, 1);
    assert_eq!(id.raw(), 0x0001_0041);
    assert_eq!(id.class(), 1);
    assert_eq!(id.type_(), 1);
    assert_eq!(id.version(), 1);
}

#[test]
fn fields_are_masked() {
    let id = ResourceId::new(0xFFFF, 0x3FF, 0x3F);
    assert_eq!(id.raw(), 0xFFFF_FFFF);

    // Overflowing type/version bits must not bleed into neighbours.
    let id = ResourceId::new(0, 0x400, 0x40);
    assert_eq!(id.raw(), 0);
}

#[test]
fn well_known_ids() {
    assert_eq!(ResourceId::RESOURCE_MANAGER.raw(), 0x0001_0041);
    assert_eq!(ResourceId::APPLICATION_INFORMATION.raw(), 0x0002_0041);
    assert_eq!(ResourceId::CONDITIONAL_ACCESS.raw(), 0x0003_0041);
    assert_eq!(ResourceId::HOST_CONTROL.raw(), 0x0020_0041);
    assert_eq!(ResourceId::DATE_TIME.raw(), 0x0024_0041);
    assert_eq!(ResourceId::MMI.raw(), 0x0040_0041);
}

#[test]
fn display_is_hex() {
    assert_eq!(
        ResourceId::RESOURCE_MANAGER.to_string(),
        "0x00010041".to_string()
    );
}

#[test]
fn u32_round_trip() {
    let id = ResourceId::from(0x0040_0041);
    assert_eq!(id, ResourceId::MMI);
    assert_eq!(u32::from(id), 0x0040_0041);
}
