mod app_router;
pub mod mail;
pub mod trials;

pub use app_router::AppRouter;
