#![allow(dead_code)]

pub mod entities;
pub mod repositories;
pub mod spy;

pub use entities::Widget;
pub use repositories::WidgetRepository;
pub use spy::{Behavior, Call, SpyFactory, SpyHandle};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Whether a bound handle is the given spy handle
pub fn is_same(
    bound: &std::sync::Arc<dyn scoped_unit_of_work::ResourceHandle>,
    handle: &std::sync::Arc<SpyHandle>,
) -> bool {
    std::ptr::eq(
        std::sync::Arc::as_ptr(bound) as *const u8,
        std::sync::Arc::as_ptr(handle) as *const u8,
    )
}
