use std::collections::BTreeMap;

use burn::prelude::*;

use crate::models::UNet3Plus;

/// What an [`EpochHook`] gets to see after each training phase.
pub struct HookContext<'a, B: Backend> {
    /// The model as it is after this epoch's updates.
    pub model: &'a UNet3Plus<B>,
    /// Scratch log state, seeded with `val_dice` = best validation Dice so far.
    pub log_buffer: &'a mut BTreeMap<String, f64>,
}

/// Instrumentation invoked once per epoch, after the training phase and before
/// validation.
pub trait EpochHook<B: Backend> {
    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>);
}

impl<B: Backend, F> EpochHook<B> for F
where
    F: FnMut(&mut HookContext<'_, B>),
{
    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) {
        self(ctx)
    }
}
