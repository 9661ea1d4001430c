use std::any::Any;

use downcast_rs::{impl_downcast, Downcast};

use crate::port::ElementType;

/// A value that can live in a render-graph buffer slot: owned, `Send` (the
/// scheduler may hand it to a worker thread), and downcastable back to its
/// concrete type by a node's kernel.
///
/// Blanket-implemented for any `T: Any + Send`; the slot holding it is
/// type-erased because the graph is not restricted to a single element
/// type.
pub trait DataValue: Any + Send + Downcast {
    fn element_type(&self) -> ElementType;
}
impl_downcast!(DataValue);

impl<T: Any + Send + Sized> DataValue for T {
    fn element_type(&self) -> ElementType {
        ElementType::of::<T>()
    }
}

/// Constructs the zero/default value used to fill the shared "blank page"
/// buffer that unconnected data inputs are patched to, and to seed newly
/// resized port-array slots.
pub trait Blank: DataValue + Clone {
    fn blank() -> Self;
}

impl Blank for f32 {
    fn blank() -> Self {
        0.0
    }
}
impl Blank for f64 {
    fn blank() -> Self {
        0.0
    }
}
impl Blank for i32 {
    fn blank() -> Self {
        0
    }
}
impl Blank for i64 {
    fn blank() -> Self {
        0
    }
}
impl Blank for bool {
    fn blank() -> Self {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_roundtrip() {
        let boxed: Box<dyn DataValue> = Box::new(42.0f32);
        assert_eq!(*boxed.downcast_ref::<f32>().unwrap(), 42.0);
        assert!(boxed.downcast_ref::<i32>().is_none());
    }
}
