//! Event selection and weight construction.
//!
//! Every step takes the selection context and the current state and returns
//! a new state; frames are immutable, so steps never affect each other's
//! inputs. [`apply_selection`] runs the steps in their fixed order: weight
//! production, channel selection, category selection.

use tsf_catalog::{Campaign, Category, Channel, ChannelSelection, Dataset, Process};
use tsf_core::{Error, Result};
use tsf_events::EventFrame;

/// Column holding the luminosity normalization of simulated events.
pub const NORM_WEIGHT: &str = "norm_weight";
/// Column holding the product of all weight components.
pub const TOTAL_WEIGHT: &str = "total_weight";
/// Always-false predicate for channels without a selection.
pub const FILTER_ALL: &str = "1 == 0";
/// Cut-flow label of [`FILTER_ALL`].
pub const FILTER_ALL_LABEL: &str = "filter_all";

/// Catalog objects a selection depends on.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Data-taking campaign.
    pub campaign: &'a Campaign,
    /// Channel whose selection is applied.
    pub channel: &'a Channel,
    /// Category whose selection is applied.
    pub category: &'a Category,
    /// Dataset-level process.
    pub process: &'a Process,
    /// Dataset the events come from.
    pub dataset: &'a Dataset,
}

/// Event frame plus the weight components registered so far.
#[derive(Debug, Clone)]
pub struct SelectionState {
    /// Current frame.
    pub events: EventFrame,
    /// Names of weight columns, multiplied into [`TOTAL_WEIGHT`].
    pub weights: Vec<String>,
}

impl SelectionState {
    /// State without weight components.
    pub fn new(events: EventFrame) -> Self {
        Self { events, weights: Vec::new() }
    }
}

/// Normalization weight expression for a simulated process, `None` for data.
///
/// `sign(genWeight) / (generator_weight * n_events) * xsec * lumi * 1000`;
/// events with `genWeight == 0` get weight 0.
pub fn norm_weight_expression(ctx: &SelectionContext<'_>) -> Result<Option<String>> {
    let process = ctx.process;
    if process.is_data {
        return Ok(None);
    }
    let xsec = process.xsec(ctx.campaign.ecm).ok_or_else(|| {
        Error::Config(format!(
            "process '{}' has no cross section at {} TeV",
            process.name, ctx.campaign.ecm
        ))
    })?;
    let fraction = process.generator_weight.ok_or_else(|| {
        Error::Config(format!("process '{}' has no generator_weight", process.name))
    })?;
    Ok(Some(format!(
        "( -1.0 * (genWeight < 0) + 1.0 * (genWeight > 0) ) / ({} * {}) * {} * {} * 1000",
        fraction, ctx.dataset.n_events, xsec, ctx.campaign.lumi
    )))
}

/// Register the normalization weight (simulation only) and define
/// [`TOTAL_WEIGHT`] as the product of all components, or `1` without any.
pub fn weight_production(ctx: &SelectionContext<'_>, state: SelectionState) -> Result<SelectionState> {
    let SelectionState { mut events, mut weights } = state;

    if let Some(expr) = norm_weight_expression(ctx)? {
        events = events.define(NORM_WEIGHT, &expr)?;
        weights.push(NORM_WEIGHT.to_string());
    }

    let total = if weights.is_empty() { "1".to_string() } else { weights.join(" * ") };
    events = events.define(TOTAL_WEIGHT, &total)?;
    Ok(SelectionState { events, weights })
}

/// Apply the channel's predicates in order, one filter each.
pub fn channel_selection(ctx: &SelectionContext<'_>, state: SelectionState) -> Result<SelectionState> {
    let SelectionState { mut events, weights } = state;
    match &ctx.channel.selection {
        ChannelSelection::Predicates(predicates) => {
            for p in predicates {
                events = events.filter(&p.expression, &p.name)?;
            }
        }
        ChannelSelection::NotImplemented => {
            tracing::warn!(channel = %ctx.channel.name, "channel has no selection, dropping all events");
            events = events.filter(FILTER_ALL, FILTER_ALL_LABEL)?;
        }
    }
    Ok(SelectionState { events, weights })
}

/// Apply the category predicate, if any.
pub fn category_selection(ctx: &SelectionContext<'_>, state: SelectionState) -> Result<SelectionState> {
    let SelectionState { mut events, weights } = state;
    if let Some(p) = &ctx.category.selection {
        events = events.filter(&p.expression, &p.name)?;
    }
    Ok(SelectionState { events, weights })
}

/// Weight production, channel selection and category selection, in order.
pub fn apply_selection(ctx: &SelectionContext<'_>, events: EventFrame) -> Result<EventFrame> {
    let state = SelectionState::new(events);
    let state = weight_production(ctx, state)?;
    let state = channel_selection(ctx, state)?;
    let state = category_selection(ctx, state)?;
    Ok(state.events)
}
