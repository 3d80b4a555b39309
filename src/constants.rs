/// Argument, operator and result key names used throughout the crate
///
/// This module centralizes all magic strings to prevent typos and make refactoring easier.

/// Connection-related field names
pub mod connection {
    pub const EDGES: &str = "edges";
    pub const NODE: &str = "node";
    pub const PAGE_INFO: &str = "pageInfo";
    pub const CURSOR: &str = "cursor";
}

/// PageInfo field names
pub mod page_info {
    pub const HAS_NEXT_PAGE: &str = "hasNextPage";
    pub const HAS_PREVIOUS_PAGE: &str = "hasPreviousPage";
    pub const START_CURSOR: &str = "startCursor";
    pub const END_CURSOR: &str = "endCursor";
}

/// Pagination argument names
pub mod pagination {
    pub const FIRST: &str = "first";
    pub const LAST: &str = "last";
    pub const BEFORE: &str = "before";
    pub const AFTER: &str = "after";
    pub const CURSOR_PREFIX: &str = "connection:";
}

/// Connection argument names
pub mod args {
    pub const FILTER: &str = "filter";
    pub const FILTER_BY: &str = "filterBy";
    pub const ORDER: &str = "order";
    pub const ORDER_BY: &str = "orderBy";
}

/// Filter expression keys
pub mod filter {
    pub const EXISTS: &str = "exists";
    pub const EQ: &str = "eq";
    pub const NE: &str = "ne";
    pub const GT: &str = "gt";
    pub const GTE: &str = "gte";
    pub const LT: &str = "lt";
    pub const LTE: &str = "lte";
    pub const MATCHES: &str = "matches";
    pub const LENGTH: &str = "length";
    pub const EMPTY: &str = "empty";
    pub const SOME: &str = "some";
    pub const EVERY: &str = "every";
    pub const NONE: &str = "none";
    pub const ID: &str = "id";
    pub const TYPE: &str = "type";
}

/// Order directions
pub mod order {
    pub const ASCENDING: &str = "ASCENDING";
    pub const DESCENDING: &str = "DESCENDING";
}

/// Update expression keys
pub mod update {
    pub const CLEAR: &str = "clear";
    pub const ADD: &str = "add";
    pub const SUB: &str = "sub";
    pub const MUL: &str = "mul";
    pub const DIV: &str = "div";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const INSERT: &str = "insert";
    pub const AT: &str = "at";
    pub const ASCENDING: &str = "ascending";
    pub const DESCENDING: &str = "descending";
    pub const KEEP_FIRST: &str = "keepFirst";
    pub const KEEP_LAST: &str = "keepLast";
    pub const DELETE: &str = "delete";
    pub const POP: &str = "pop";
    pub const POP_FIRST: &str = "first";
    pub const POP_LAST: &str = "last";
}

/// Aggregate function names
pub mod aggregate {
    pub const COUNT: &str = "count";
    pub const SUM: &str = "sum";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const AVERAGE: &str = "average";
}

/// MongoDB query, update and aggregation operator names
pub mod mongo {
    pub const MATCH: &str = "$match";
    pub const GROUP: &str = "$group";
    pub const SORT: &str = "$sort";
    pub const SKIP: &str = "$skip";
    pub const LIMIT: &str = "$limit";

    pub const AND: &str = "$and";
    pub const OR: &str = "$or";
    pub const NOR: &str = "$nor";
    pub const NOT: &str = "$not";
    pub const EQ: &str = "$eq";
    pub const NE: &str = "$ne";
    pub const GT: &str = "$gt";
    pub const GTE: &str = "$gte";
    pub const LT: &str = "$lt";
    pub const LTE: &str = "$lte";
    pub const IN: &str = "$in";
    pub const NIN: &str = "$nin";
    pub const REGEX: &str = "$regex";
    pub const TYPE: &str = "$type";
    pub const SIZE: &str = "$size";
    pub const ELEM_MATCH: &str = "$elemMatch";

    pub const LITERAL: &str = "$literal";
    pub const COND: &str = "$cond";
    pub const IF_NULL: &str = "$ifNull";
    pub const IS_ARRAY: &str = "$isArray";
    pub const IS_NUMBER: &str = "$isNumber";
    pub const FILTER: &str = "$filter";
    pub const SUBSTR: &str = "$substr";
    pub const STR_LEN_BYTES: &str = "$strLenBytes";
    pub const SUBTRACT: &str = "$subtract";
    pub const SUM: &str = "$sum";
    pub const MIN: &str = "$min";
    pub const MAX: &str = "$max";
    pub const AVG: &str = "$avg";

    pub const SET: &str = "$set";
    pub const UNSET: &str = "$unset";
    pub const INC: &str = "$inc";
    pub const MUL: &str = "$mul";
    pub const PUSH: &str = "$push";
    pub const PULL: &str = "$pull";
    pub const POP: &str = "$pop";
    pub const EACH: &str = "$each";
    pub const POSITION: &str = "$position";
    pub const SLICE: &str = "$slice";
}
