pub trait FloatExt {
    fn approximately_eq(self, other: Self) -> bool;
    fn approximately_zero(self) -> bool;
}

impl FloatExt for f64 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON
    }

    fn approximately_zero(self) -> bool {
        self.abs() < crate::EPSILON
    }
}
