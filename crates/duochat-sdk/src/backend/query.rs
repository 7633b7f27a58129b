//! 过滤查询 AST - 远程数据访问能力的查询形状
//!
//! 远端行存储只承诺一种很小的查询语言：等值 / 不等值叶子，
//! AND / OR 组合，按列排序，限制条数。本模块把这个语言表达成
//! 类型化的 AST，三张表共用一套列枚举。
//!
//! "双向好友关系" 的查询形状（两组 AND 的 OR）正是这套组合的
//! 设计出发点。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Friendship, FriendshipStatus, Message, Profile};

/// 可被过滤 / 排序的列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Column {
    /// 行主键（三张表通用）
    Id,
    /// profiles.email
    Email,
    /// friendships.requester_id
    RequesterId,
    /// friendships.addressee_id
    AddresseeId,
    /// friendships.status
    Status,
    /// messages.friendship_id
    FriendshipId,
    /// messages.sender_id
    SenderId,
    /// messages.is_read
    IsRead,
    /// created_at（三张表通用，排序列）
    CreatedAt,
}

/// 过滤值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Uuid(Uuid),
    Str(String),
    Bool(bool),
    Status(FriendshipStatus),
    Time(DateTime<Utc>),
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<FriendshipStatus> for Value {
    fn from(v: FriendshipStatus) -> Self {
        Value::Status(v)
    }
}

/// 过滤条件
///
/// 叶子对行中不存在的列永远不匹配（Eq 与 Neq 一致），
/// 这样把 profiles 的过滤误用到 messages 上时失败是安静且确定的。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// 无条件匹配
    All,
    Eq(Column, Value),
    Neq(Column, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: Column, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    pub fn neq(column: Column, value: impl Into<Value>) -> Self {
        Filter::Neq(column, value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// 一对用户之间的关系（两个方向）：两组 AND 的 OR
    pub fn friendship_between(a: Uuid, b: Uuid) -> Self {
        Filter::or(vec![
            Filter::and(vec![
                Filter::eq(Column::RequesterId, a),
                Filter::eq(Column::AddresseeId, b),
            ]),
            Filter::and(vec![
                Filter::eq(Column::RequesterId, b),
                Filter::eq(Column::AddresseeId, a),
            ]),
        ])
    }

    /// 对一行求值
    pub fn matches<R: Selectable>(&self, row: &R) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(column, value) => row.column_value(*column).as_ref() == Some(value),
            Filter::Neq(column, value) => match row.column_value(*column) {
                Some(actual) => actual != *value,
                None => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// 一次过滤查询：条件 + 可选排序 + 可选条数限制
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Option<(Column, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            order_by: None,
            limit: None,
        }
    }

    pub fn all() -> Self {
        Self::filtered(Filter::All)
    }

    pub fn order_by(mut self, column: Column, direction: Direction) -> Self {
        self.order_by = Some((column, direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 行对列取值的统一入口，过滤求值和订阅过滤都走这里
pub trait Selectable {
    /// 该行在指定列上的值；列不适用于该行类型时返回 None
    fn column_value(&self, column: Column) -> Option<Value>;
}

impl Selectable for Profile {
    fn column_value(&self, column: Column) -> Option<Value> {
        match column {
            Column::Id => Some(Value::Uuid(self.id)),
            Column::Email => Some(Value::Str(self.email.clone())),
            Column::CreatedAt => Some(Value::Time(self.created_at)),
            _ => None,
        }
    }
}

impl Selectable for Friendship {
    fn column_value(&self, column: Column) -> Option<Value> {
        match column {
            Column::Id => Some(Value::Uuid(self.id)),
            Column::RequesterId => Some(Value::Uuid(self.requester_id)),
            Column::AddresseeId => Some(Value::Uuid(self.addressee_id)),
            Column::Status => Some(Value::Status(self.status)),
            Column::CreatedAt => Some(Value::Time(self.created_at)),
            _ => None,
        }
    }
}

impl Selectable for Message {
    fn column_value(&self, column: Column) -> Option<Value> {
        match column {
            Column::Id => Some(Value::Uuid(self.id)),
            Column::FriendshipId => Some(Value::Uuid(self.friendship_id)),
            Column::SenderId => Some(Value::Uuid(self.sender_id)),
            Column::IsRead => Some(Value::Bool(self.is_read)),
            Column::CreatedAt => Some(Value::Time(self.created_at)),
            _ => None,
        }
    }
}
