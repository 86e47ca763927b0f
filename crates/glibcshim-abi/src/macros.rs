//! Helper macros for wrapper handler generation.
//!
//! Provides the `wrapper_fn!` macro that generates `pub unsafe extern "C" fn`
//! handlers. Unlike exported ABI symbols, handlers carry no `#[no_mangle]`:
//! the catalog registers them by address.

/// Generate a catalog handler with the C calling convention.
///
/// # Usage
///
/// ```ignore
/// wrapper_fn! {
///     /// Doc comment for the handler.
///     fn my_func(arg1: Type1, arg2: Type2) -> ReturnType {
///         // implementation body
///     }
/// }
/// ```
///
/// The body runs inside an `unsafe` block, since nearly every handler
/// dereferences foreign pointers or calls the host.
macro_rules! wrapper_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            #[allow(unused_unsafe)]
            unsafe { $body }
        }
    };

    // Variant without return type (returns ())
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? )
        $body:block
    ) => {
        $(#[$meta])*
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) {
            #[allow(unused_unsafe)]
            unsafe { $body }
        }
    };
}
