// Round a floating point value into an integer DAC code, clamped to
// `0..=max`. NaN maps to 0.
macro_rules! dac_code {
    ($val:expr, $max:expr) => {
        match (($val) as f64).round() {
            c if c.is_nan() => 0u32,
            c if c < 0.0 => 0u32,
            c if c > ($max as f64) => $max as u32,
            c => c as u32
        }
    };

    ($val:expr) => {
        dac_code!($val, 255u32)
    }
}

// Dump encoded command words when the `debug_commands` feature is
// enabled; expands to nothing otherwise.
macro_rules! cmddbg {
    ($label:expr, $family:expr, $words:expr) => {
        #[cfg(feature="debug_commands")] {
            for (idx, word) in $words.iter().enumerate() {
                match $family {
                    $crate::registers::ChipFamily::Rhd =>
                        log::trace!("{} [{:4}]: 0x{:04x}", $label, idx, word),
                    $crate::registers::ChipFamily::Rhs =>
                        log::trace!("{} [{:4}]: 0x{:08x}", $label, idx, word),
                }
            }
        }
    };
}
