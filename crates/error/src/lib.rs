//! Error handling infrastructure shared by the simulator crates.
//!
//! Provides the `define_sim_error!` macro. Every error enum carries a
//! subsystem byte, and every variant a code within that subsystem, so a
//! failure can be reported as a single `EXXYY` number in logs and stats dumps.
//!
//! ## Usage
//!
//! ### Simple errors (no inner data)
//! ```ignore
//! define_sim_error! {
//!     pub enum AllocError(0x01) {
//!         OutOfMemory = 0x01 => "Physical memory exhausted",
//!         BadOrder = 0x02 => "Block order out of range",
//!     }
//! }
//! ```
//!
//! ### Nested errors (with inner error type)
//! ```ignore
//! define_sim_error! {
//!     pub enum FaultError(0x03) {
//!         Alloc(AllocError) = 0x01 => "Fault handler could not allocate",
//!     }
//! }
//! ```

#![no_std]

/// Define a simulator error type with consistent code, name and display.
///
/// Supports both simple variants and variants wrapping an inner error, or
/// any other `Copy + Display` payload such as a faulting address.
#[macro_export]
macro_rules! define_sim_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(($inner:ty))? = $code:literal => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant $(($inner))?,
            )*
        }

        impl $name {
            /// Subsystem identifier for this error type.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Numeric error code, subsystem in the high byte.
            pub const fn code(&self) -> u16 {
                match self {
                    $(
                        $crate::define_sim_error!(@pattern $variant $(($inner))? _unused) => {
                            (($subsystem as u16) << 8) | $code
                        }
                    )*
                }
            }

            /// Short description for logging.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(
                        $crate::define_sim_error!(@pattern $variant $(($inner))? _unused) => {
                            $desc
                        }
                    )*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        $crate::define_sim_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_sim_error!(@display_body self f $desc $(($inner))? inner)
                        }
                    )*
                }
            }
        }

        impl core::error::Error for $name {}
    };

    (@pattern $variant:ident ($inner:ty) $bind:ident) => { Self::$variant($bind) };
    (@pattern $variant:ident $bind:ident) => { Self::$variant };

    (@display_body $self:ident $f:ident $desc:literal ($inner:ty) $bind:ident) => {
        write!($f, "E{:04X}: {} ({})", $self.code(), $desc, $bind)
    };
    (@display_body $self:ident $f:ident $desc:literal $bind:ident) => {
        write!($f, "E{:04X}: {}", $self.code(), $desc)
    };
}

/// Display wrapper printing an address as `0x...` inside nested errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr(pub u64);

impl core::fmt::Display for Addr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Addr;

    extern crate std;
    use std::format;

    define_sim_error! {
        /// Allocation failures
        pub enum PoolError(0x0A) {
            /// Nothing left
            Exhausted = 0x01 => "Pool exhausted",
            Fragmented = 0x02 => "No contiguous block",
        }
    }

    define_sim_error! {
        pub enum WalkError(0x0B) {
            Pool(PoolError) = 0x01 => "Walk could not allocate",
            Unmapped(Addr) = 0x02 => "Address unmapped",
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PoolError::Exhausted.code(), 0x0A01);
        assert_eq!(PoolError::Fragmented.code(), 0x0A02);
        assert_eq!(WalkError::Pool(PoolError::Exhausted).code(), 0x0B01);
        assert_eq!(WalkError::Unmapped(Addr(0x1000)).code(), 0x0B02);
    }

    #[test]
    fn test_error_names() {
        assert_eq!(PoolError::Fragmented.name(), "No contiguous block");
        assert_eq!(WalkError::Unmapped(Addr(0)).name(), "Address unmapped");
    }

    #[test]
    fn test_display_format() {
        assert_eq!(format!("{}", PoolError::Exhausted), "E0A01: Pool exhausted");
        assert_eq!(
            format!("{}", WalkError::Pool(PoolError::Fragmented)),
            "E0B01: Walk could not allocate (E0A02: No contiguous block)"
        );
        assert_eq!(
            format!("{}", WalkError::Unmapped(Addr(0x7fff_0000))),
            "E0B02: Address unmapped (0x7fff0000)"
        );
    }

    #[test]
    fn test_subsystem_constant() {
        assert_eq!(PoolError::SUBSYSTEM, 0x0A);
        assert_eq!(WalkError::SUBSYSTEM, 0x0B);
    }
}
