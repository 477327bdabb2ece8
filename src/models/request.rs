/// Per-request input extracted by the host from its transport layer.
///
/// The engine treats `identity` as an opaque correlation key (typically the
/// client's source address) and never parses `content` beyond signature
/// inspection.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Opaque client identity key.
    pub identity: &'a str,

    /// HTTP method as received.
    pub method: &'a str,

    /// Serialized request content to inspect.
    pub content: &'a str,

    /// Declared payload size in bytes; zero means "no body".
    pub size: u64,

    /// Route path used to resolve per-route limits.
    pub path: &'a str,
}

impl<'a> RequestInfo<'a> {
    pub fn new(
        identity: &'a str,
        method: &'a str,
        content: &'a str,
        size: u64,
        path: &'a str,
    ) -> Self {
        Self {
            identity,
            method,
            content,
            size,
            path,
        }
    }
}
