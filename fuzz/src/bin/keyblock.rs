/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

#[cfg(not(windows))]
mod fuzz {
    use crosimage::{
        format::cmdline::KernelCmdline,
        image::kernel::{self, BootType},
    };
    use honggfuzz::fuzz;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                if let Some(header) = kernel::parse_header(data) {
                    let cmdline = KernelCmdline::scan(data);
                    let boot_type = kernel::classify_with_cmdline(&header, cmdline.as_ref());

                    if !header.has_valid_magic() {
                        assert_eq!(boot_type, BootType::Invalid);
                    }
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
