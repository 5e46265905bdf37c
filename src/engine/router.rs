//! Decides whether to answer directly or delegate to an executor.

use anyhow::Result;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use super::formatter::render_deterministic;
use crate::executors::ExecutorRegistry;
use crate::parsing::{self, bool_field, str_field, ParseResult};
use crate::providers::{CompletionOptions, ModelGateway};
use crate::types::{ExecutorDescriptor, ParamKind, ParamSpec, RoutingContext, RoutingDecision};

pub const ROUTER_SYSTEM_PROMPT: &str = "You are the routing brain of an assistant. For each user \
request decide whether to answer it yourself or delegate it to one of the available agents.\n\
Answer directly for general knowledge, conversation and anything no agent is needed for. \
Delegate only to agents marked [implemented], never to [planned] agents or to agents listed as failed. \
When delegating, fill every required parameter from the request; URLs must be absolute, for searches \
build the site's search URL.\n\
Respond with JSON only, one of:\n\
{\"isCompleted\": true, \"response\": \"<answer for the user>\"}\n\
{\"isCompleted\": false, \"nextAgent\": \"<agent name>\", \"params\": {...}, \"reasoning\": \"<why>\"}";

pub const FINAL_FORMULATION_MARKER: &str = "Mode: final formulation";

const NO_RESULT_MESSAGE: &str = "I wasn't able to complete this request with the agents available \
right now. Could you rephrase it or add more details?";

fn describe_param(out: &mut String, spec: &ParamSpec) {
    let kind = match spec.kind {
        ParamKind::Text => "text",
        ParamKind::Url => "url",
    };
    let _ = write!(out, "{} ({}): {}; ", spec.name, kind, spec.description);
}

fn describe_executor(out: &mut String, descriptor: &ExecutorDescriptor) {
    let status = if descriptor.is_implemented() { "implemented" } else { "planned" };
    let _ = writeln!(out, "- {} [{}]: {}", descriptor.name, status, descriptor.description);

    out.push_str("  required: ");
    for spec in &descriptor.required_params {
        describe_param(out, spec);
    }
    out.push('\n');
    if !descriptor.optional_params.is_empty() {
        out.push_str("  optional: ");
        for spec in &descriptor.optional_params {
            describe_param(out, spec);
        }
        out.push('\n');
    }
    let _ = writeln!(out, "  capabilities: {}", descriptor.capabilities.join(", "));
    if !descriptor.examples.is_empty() {
        let _ = writeln!(out, "  examples: {}", descriptor.examples.join(" | "));
    }
}

pub fn build_prompt(
    user_prompt: &str,
    last_agent: Option<&str>,
    ctx: &RoutingContext,
    registry: &ExecutorRegistry,
) -> String {
    let mut out = format!("User request: {}\n\nAvailable agents:\n", user_prompt);
    for descriptor in registry.descriptors() {
        describe_executor(&mut out, descriptor);
    }

    let failed: Vec<&str> = ctx.failed_agents.iter().map(String::as_str).collect();
    let _ = write!(
        out,
        "\nContext:\n- last agent: {}\n- failed agents: {}\n- step: {}\n",
        last_agent.unwrap_or("none"),
        if failed.is_empty() { "none".to_string() } else { failed.join(", ") },
        ctx.step
    );

    if let Some(last) = &ctx.last_agent_result {
        let _ = write!(
            out,
            "- last agent result ({}, {:?}): {}\n",
            last.agent,
            last.status,
            serde_json::to_string(&last.result).unwrap_or_default()
        );
        if let Some(message) = &last.message {
            let _ = writeln!(out, "- last agent message: {}", message);
        }
    }

    if ctx.final_formulation {
        let _ = write!(
            out,
            "\n{}\nDo not delegate. Write the final answer for the user from the last agent result, \
             including every item it contains. If the agent failed, say so honestly and share \
             whatever partial information exists. Respond with {{\"isCompleted\": true, \"response\": \"...\"}}.\n",
            FINAL_FORMULATION_MARKER
        );
    }
    out
}

/// Deterministic direct answer built from the last executor output.
pub fn synthesize_direct(ctx: &RoutingContext) -> String {
    let Some(last) = &ctx.last_agent_result else {
        return NO_RESULT_MESSAGE.to_string();
    };

    if last.already_formatted {
        if let Some(text) = last.result.as_str() {
            return text.to_string();
        }
    }

    let mut text = String::new();
    if let Some(message) = &last.message {
        let _ = write!(text, "{} reported: {}", last.agent, message);
    }
    if let Some(body) = render_deterministic(&last.result, &last.agent) {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&body);
    }

    if text.is_empty() {
        NO_RESULT_MESSAGE.to_string()
    } else {
        text
    }
}

pub struct DecisionRouter {
    gateway: Arc<ModelGateway>,
}

impl DecisionRouter {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Returns `Err` only when the model cannot be reached outside final
    /// formulation; every policy violation becomes a direct answer.
    pub async fn decide(
        &self,
        user_prompt: &str,
        last_agent: Option<&str>,
        ctx: &RoutingContext,
        registry: &ExecutorRegistry,
    ) -> Result<RoutingDecision> {
        if ctx.final_formulation {
            if let Some(last) = ctx.last_agent_result.as_ref().filter(|r| r.already_formatted) {
                if let Some(text) = last.result.as_str() {
                    return Ok(RoutingDecision::direct(text));
                }
            }
        }

        let prompt = build_prompt(user_prompt, last_agent, ctx, registry);
        let raw = match self
            .gateway
            .complete(ROUTER_SYSTEM_PROMPT, prompt, &CompletionOptions::json())
            .await
        {
            Ok(raw) => raw,
            Err(err) if ctx.final_formulation => {
                log::warn!("Final formulation call failed, synthesizing answer: {}", err);
                return Ok(RoutingDecision::direct(synthesize_direct(ctx)));
            }
            Err(err) => return Err(err),
        };

        Ok(self.interpret(&raw, ctx, registry))
    }

    fn interpret(&self, raw: &str, ctx: &RoutingContext, registry: &ExecutorRegistry) -> RoutingDecision {
        let map = match parsing::parse_json_object(raw) {
            ParseResult::Ok(map) => map,
            ParseResult::Malformed(text) => {
                log::debug!("Router output was not JSON, treating as direct answer");
                let text = parsing::strip_code_fences(&text).to_string();
                return if text.is_empty() {
                    RoutingDecision::direct(synthesize_direct(ctx))
                } else {
                    RoutingDecision::direct(text)
                };
            }
        };

        let next_agent = str_field(&map, "nextAgent").or_else(|| str_field(&map, "agent"));
        let completed = bool_field(&map, "isCompleted");

        match next_agent {
            Some(agent) if completed != Some(true) => self.vet_route(agent, &map, ctx, registry),
            _ => {
                let response = ["response", "answer", "finalAnswer"]
                    .iter()
                    .find_map(|field| str_field(&map, field));
                match response {
                    Some(text) => RoutingDecision::direct(text),
                    None => RoutingDecision::direct(synthesize_direct(ctx)),
                }
            }
        }
    }

    fn vet_route(
        &self,
        agent: &str,
        map: &Map<String, Value>,
        ctx: &RoutingContext,
        registry: &ExecutorRegistry,
    ) -> RoutingDecision {
        let rejection = if ctx.final_formulation {
            Some("routing is not allowed during final formulation")
        } else {
            match registry.descriptor(agent) {
                None => Some("unknown agent"),
                Some(d) if !d.is_implemented() => Some("agent is planned but not implemented"),
                Some(_) if ctx.has_failed(agent) => Some("agent already failed for this task"),
                Some(_) => None,
            }
        };

        if let Some(reason) = rejection {
            log::warn!("Rejected route to {}: {}", agent, reason);
            return RoutingDecision::direct(synthesize_direct(ctx));
        }

        let params = map
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let reasoning = str_field(map, "reasoning").unwrap_or_default().to_string();
        log::info!("Routing to {}: {}", agent, reasoning);

        RoutingDecision::Route {
            next_agent: agent.to_string(),
            params,
            reasoning,
        }
    }
}
