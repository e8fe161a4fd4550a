use vmsim_error::define_sim_error;

pub use vmsim_error::Addr;

define_sim_error! {
    /// Errors of the translation core (0x01xx).
    pub enum MmError(0x01) {
        /// Neither a reservation, a 4KB frame nor a demotion could satisfy the request
        OutOfMemory = 0x01 => "Physical memory exhausted",
        /// Range design only: no VMA covers the address
        VmaMissing(Addr) = 0x02 => "No VMA covers address",
        /// The walk found no translation even after fault handling
        Unmapped(Addr) = 0x03 => "Address unmapped after fault handling",
        /// A range design request reached a space without a range table
        NoRangeTable = 0x04 => "Address space has no range table",
    }
}

define_sim_error! {
    /// Rejected configuration (0x02xx).
    pub enum ConfigError(0x02) {
        Tlb(&'static str) = 0x01 => "Invalid TLB geometry",
        Allocator(&'static str) = 0x02 => "Invalid allocator parameters",
        Walker(&'static str) = 0x03 => "Invalid walker parameters",
        Range(&'static str) = 0x04 => "Invalid range unit parameters",
        PageTable(&'static str) = 0x05 => "Invalid page table parameters",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mm_error_codes() {
        assert_eq!(MmError::OutOfMemory.code(), 0x0101);
        assert_eq!(MmError::Unmapped(Addr(0)).code(), 0x0103);
        assert_eq!(ConfigError::Walker("x").code(), 0x0203);
    }

    #[test]
    fn test_display_carries_address() {
        assert_eq!(
            MmError::VmaMissing(Addr(0xdead_0000)).to_string(),
            "E0102: No VMA covers address (0xdead0000)"
        );
        assert_eq!(
            ConfigError::Tlb("associativity must divide entries").to_string(),
            "E0201: Invalid TLB geometry (associativity must divide entries)"
        );
    }
}
