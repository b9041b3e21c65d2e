// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

pub mod cmdline;
pub mod keyblock;
pub mod manifest;
pub mod parted;
