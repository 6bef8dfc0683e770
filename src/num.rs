/// Bit access for the register words the emulator deals in (u8 and u16).
pub trait GetBit: Copy {
    fn bit(self, n: u8) -> bool;
}

macro_rules! impl_get_bit {
    ($($t:ty),*) => {
        $(
            impl GetBit for $t {
                #[inline]
                fn bit(self, n: u8) -> bool {
                    assert!(u32::from(n) < <$t>::BITS, "bit {n} out of range for {}", stringify!($t));

                    self & (1 << n) != 0
                }
            }
        )*
    };
}

impl_get_bit!(u8, u16);
