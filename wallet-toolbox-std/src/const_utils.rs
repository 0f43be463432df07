//! Utilities for use in `const` fns and expressions.

/// Assert at compile that that a boolean expression evaluates to true.
/// Implementation copied from the static_assertions crate.
#[macro_export]
macro_rules! const_assert {
    ($x:expr $(,)?) => {
        #[allow(clippy::const_is_empty, clippy::eq_op, unknown_lints)]
        const _: [(); 0 - !{
            const CONST_ASSERT: bool = $x;
            CONST_ASSERT
        } as usize] = [];
    };
}

/// Assert at compile time that two `usize` values are equal. This assert has a
/// nice benefit where there compiler error will actually _print out_ the
/// two values.
#[macro_export]
macro_rules! const_assert_usize_eq {
    ($x:expr, $y:expr $(,)?) => {
        const _: [(); $x] = [(); $y];
    };
}

/// Assert at compile time that a type has a specific in-memory size in bytes.
///
/// The assertion is only effective on 64-bit archs since we don't care about
/// 32-bit Android ARM (the only 32-bit arch we compile to, and making the
/// assertion more complicated just for that is not worth it).
///
/// Usage: `const_assert_mem_size!(u64, 8);`
#[macro_export]
macro_rules! const_assert_mem_size {
    ($type:ty, $size:expr $(,)?) => {
        #[cfg(target_pointer_width = "64")]
        $crate::const_assert_usize_eq!(::core::mem::size_of::<$type>(), $size);
    };
}

/// [`Option::unwrap`] but works in `const fn`.
// TODO(phlip9): remove this when const unwrap stabilizes
pub const fn const_option_unwrap<T: Copy>(option: Option<T>) -> T {
    match option {
        Some(value) => value,
        None => panic!("unwrap on None"),
    }
}

/// [`Result::unwrap`] but works in `const fn`.
// TODO(phlip9): remove this when const unwrap stabilizes
pub const fn const_result_unwrap<T: Copy, E: Copy>(result: Result<T, E>) -> T {
    match result {
        Ok(result) => result,
        Err(_) => panic!("unwrap on Err"),
    }
}
