use crate::config::Backend;

pub mod tasks;
pub mod uring;

/// Picks the concrete backend for `Auto`.
pub fn resolve(backend: Backend) -> Backend {
    match backend {
        Backend::Auto if uring::is_supported() => Backend::IoUring,
        Backend::Auto => {
            tracing::info!(message = "io_uring not supported here, falling back to tokio");
            Backend::Tokio
        }
        explicit => explicit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_backends_are_kept() {
        assert_eq!(resolve(Backend::Tokio), Backend::Tokio);
        assert_eq!(resolve(Backend::IoUring), Backend::IoUring);
    }

    #[test]
    fn auto_resolves_to_a_concrete_backend() {
        assert_ne!(resolve(Backend::Auto), Backend::Auto);
    }
}
