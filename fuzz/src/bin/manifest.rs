/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

#[cfg(not(windows))]
mod fuzz {
    use crosimage::format::{manifest::Manifest, parted};
    use honggfuzz::fuzz;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let text = String::from_utf8_lossy(data);
                let manifest = Manifest::parse(&text);

                for number in 0..4 {
                    let _ = manifest.find(number);
                    let _ = parted::find_partition(&text, number);
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
