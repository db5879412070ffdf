pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_NODE_COUNT: usize = 3;
pub(crate) const NODE_ID_PREFIX: &str = "node";
