//! Operation names shared by the store, its errors and the instrumentation layer.

use std::fmt;

/// Every operation exposed by the getter/setter capability sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetById,
    GetManyByIds,
    GetAll,
    GetArrayBySingleId,
    GetLatestVersions,
    GetLatestCollectionVersion,
    Insert,
    InsertMany,
    InsertOrUpdate,
    Update,
    Remove,
    RemoveAll,
    GetAndLockById,
    ReleaseLockedById,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetById => "GetById",
            Operation::GetManyByIds => "GetManyByIds",
            Operation::GetAll => "GetAll",
            Operation::GetArrayBySingleId => "GetArrayBySingleId",
            Operation::GetLatestVersions => "GetLatestVersions",
            Operation::GetLatestCollectionVersion => "GetLatestCollectionVersion",
            Operation::Insert => "Insert",
            Operation::InsertMany => "InsertMany",
            Operation::InsertOrUpdate => "InsertOrUpdate",
            Operation::Update => "Update",
            Operation::Remove => "Remove",
            Operation::RemoveAll => "RemoveAll",
            Operation::GetAndLockById => "GetAndLockById",
            Operation::ReleaseLockedById => "ReleaseLockedById",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
