//! The view of a live document that the page agent works against.
//!
//! Element handles are opaque indices owned by the document; the agent keeps
//! them only in its local hidden-element table and never sends them over the
//! request/response boundary.

/// Opaque handle to an element of a [`Document`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

/// Scroll/client/offset sizes of the root or body element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub scroll_width: u32,
    pub scroll_height: u32,
    pub client_width: u32,
    pub client_height: u32,
    pub offset_height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overflow {
    #[default]
    Visible,
    Hidden,
    Auto,
    Scroll,
}

impl Overflow {
    /// `auto` and `scroll` let an element scroll its own content
    pub fn scrolls(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

/// The subset of computed style the agent looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputedStyle {
    pub position: Position,
    pub overflow: Overflow,
    pub overflow_y: Overflow,
}

/// Snapshot of one element as seen by the agent's selectors
#[derive(Debug, Clone, Default)]
pub struct ElementInfo {
    pub id: ElementId,
    /// Lowercase tag name
    pub tag: String,
    pub classes: Vec<String>,
    pub attributes: Vec<(String, String)>,
    /// Raw value of the `style` attribute
    pub inline_style: String,
    pub computed: ComputedStyle,
    pub scroll_width: u32,
    pub scroll_height: u32,
}

impl ElementInfo {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Equivalent of the `[style*="..."]` attribute selector
    pub fn style_contains(&self, needle: &str) -> bool {
        self.inline_style.contains(needle)
    }
}

/// Synthetic events dispatched on the window after a scroll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Scroll,
    Resize,
}

/// A document the agent can measure, scroll and restyle.
pub trait Document {
    fn root_extent(&self) -> Extent;

    fn body_extent(&self) -> Option<Extent>;

    /// `innerWidth` x `innerHeight`
    fn viewport_size(&self) -> (u32, u32);

    fn device_pixel_ratio(&self) -> f64;

    fn scroll_position(&self) -> (f64, f64);

    fn elements(&self) -> Vec<ElementInfo>;

    /// Current inline `display` value, `None` when unset
    fn inline_display(&self, id: ElementId) -> Option<String>;

    /// Set or clear the inline `display` value. Returns false when the
    /// element no longer exists.
    fn set_inline_display(&mut self, id: ElementId, display: Option<&str>) -> bool;

    /// Scroll the document's scrolling root
    fn scroll_to(&mut self, x: f64, y: f64);

    fn flush_layout(&mut self) {}

    fn dispatch(&mut self, _event: PageEvent) {}
}
