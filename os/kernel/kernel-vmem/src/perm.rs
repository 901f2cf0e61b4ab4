use bitflags::bitflags;

bitflags! {
    /// Leaf permissions as passed to and returned from the table manager.
    ///
    /// Bit positions equal the Sv39 PTE bits, so a set converts to and from an
    /// entry by masking. The hardware-maintained `A`/`D` bits and `V` are not
    /// part of the set; the table manager owns them.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PagePerm: u64 {
        /// Loads are permitted.
        const READ = 1 << 1;

        /// Stores are permitted.
        ///
        /// Sv39 requires `READ` alongside; write-only is a reserved encoding.
        const WRITE = 1 << 2;

        /// Instruction fetches are permitted.
        const EXEC = 1 << 3;

        /// Accessible from U-mode. Supervisor access to such pages needs `sstatus.SUM`.
        const USER = 1 << 4;

        /// Mapping exists in every address space (TLB entries survive ASID switches).
        const GLOBAL = 1 << 5;

        /// Software marker (RSW bit 8): the page is shared copy-on-write and
        /// `WRITE` was withheld on purpose.
        const COPY_ON_WRITE = 1 << 8;
    }
}

impl PagePerm {
    /// Kernel data: read + write.
    pub const RW: Self = Self::READ.union(Self::WRITE);

    /// Kernel text: read + execute.
    pub const RX: Self = Self::READ.union(Self::EXEC);

    /// Ordinary user memory: read + write + execute + user.
    pub const USER_RWX: Self = Self::READ
        .union(Self::WRITE)
        .union(Self::EXEC)
        .union(Self::USER);

    /// Any of R/W/X present, i.e. the entry would be a leaf.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.intersects(Self::READ.union(Self::WRITE).union(Self::EXEC))
    }
}
