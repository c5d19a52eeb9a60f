mod comment;
mod user;
mod watchlist;

pub use comment::{Comment, CommentStatus};
pub use user::User;
pub use watchlist::WatchlistEntry;
