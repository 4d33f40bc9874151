//! Arena handles.
//!
//! Ports, clock blocks, peripherals and parked threads all live in vectors
//! owned by [`crate::core::Core`]; everything that would otherwise be a
//! pointer or an `Rc` in a naive port-graph is one of these instead — an
//! opaque, `Copy`, hashable index, in the same spirit as `mio::Token`.

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        pub struct $name(pub u32);

        impl $name {
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(i: usize) -> Self {
                $name(i as u32)
            }
        }
    };
}

arena_id!(PortId);
arena_id!(ClockBlockId);
arena_id!(ThreadId);
arena_id!(PeripheralId);
