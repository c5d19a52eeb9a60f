pub mod erc20;
pub mod pool_manager;
pub mod state_view;

pub use erc20::IERC20;
pub use pool_manager::Initialize;
pub use state_view::IStateView;
