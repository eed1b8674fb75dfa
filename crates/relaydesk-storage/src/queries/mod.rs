// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules. Each function takes `&Database` and runs on the writer thread.

pub mod sessions;
