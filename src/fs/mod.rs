//! Resource trees and local filesystem primitives.

pub mod local_tree;
pub mod operations;
pub mod remote_tree;
pub mod tree;

pub use local_tree::build_local_tree;
pub use remote_tree::build_remote_tree;
pub use tree::{NodeKind, TreeNode};
