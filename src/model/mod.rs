pub use post::*;
pub use timestamp::*;
pub use view::*;

mod post;
mod timestamp;
mod view;
