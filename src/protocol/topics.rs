//! Topic construction for the Homie namespace
//!
//! Device-level topics are `<base><device>/<part>`. Node-relative parts are
//! `<node>/<part>`, so a property value lives at `<base><device>/<node>/<property>`
//! and its command topic at `<base><device>/<node>/<property>/set`.

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build a device topic: `<base><device>/<part>`
    ///
    /// `base` is expected to end with a separator already.
    pub fn device_topic(base: &str, device: &str, part: &str) -> String {
        format!("{base}{device}/{part}")
    }

    /// Build a node-relative part: `<node>/<part>`
    pub fn node_topic(node: &str, part: &str) -> String {
        format!("{node}/{part}")
    }

    /// Build a node-relative property part: `<node>/<property>`
    pub fn property_topic(node: &str, property: &str) -> String {
        Self::node_topic(node, property)
    }

    /// Build a node-relative command part: `<node>/<property>/set`
    pub fn set_topic(node: &str, property: &str) -> String {
        Self::node_topic(node, &format!("{property}/set"))
    }
}
