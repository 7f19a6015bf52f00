pub mod group;
pub mod heap;

pub use group::{resolve_group_mapper, GroupMapper, GROUP_ANY};
pub use heap::TasksHeap;
