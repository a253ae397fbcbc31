//! Shared registration for the lkrun integration tests.

use linkme::distributed_slice;

/// A test function registered with [`integration_test!`]
pub type TestFn = fn() -> color_eyre::Result<()>;

pub struct IntegrationTest {
    pub name: &'static str,
    pub f: TestFn,
}

/// All tests registered across the binary
#[distributed_slice]
pub static INTEGRATION_TESTS: [IntegrationTest];

/// Register a `fn() -> color_eyre::Result<()>` as an integration test.
#[macro_export]
macro_rules! integration_test {
    ($fn_name:ident) => {
        const _: () = {
            #[::linkme::distributed_slice($crate::INTEGRATION_TESTS)]
            static TEST: $crate::IntegrationTest = $crate::IntegrationTest {
                name: stringify!($fn_name),
                f: $fn_name,
            };
        };
    };
}
