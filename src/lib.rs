// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cfg;
pub mod resource;
pub mod session;
pub mod spdu;
pub mod transport;
