use slotmap::new_key_type;

new_key_type! {
    /// Identifies a model in the context's arena. Keys are versioned, so an
    /// id held after its model was decommissioned never aliases a newer model.
    pub struct ModelId;
}
