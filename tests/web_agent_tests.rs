//! Browser agent runs driven through the executor interface.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use common::{
    browser_agent, fast_browser_config, gateway, listing_page, shop_engine, system, FaultyEngine,
    SEARCH_URL,
};
use wayfarer::browser::{BrowserAgent, DomNode, StaticEngine};
use wayfarer::config::BrowserAgentConfig;
use wayfarer::executors::{Executor, WebAgentExecutor};
use wayfarer::governor::ContentGovernor;
use wayfarer::providers::{MockLLMProvider, ModelGateway};
use wayfarer::types::ExecutionStatus;

fn params(url: &str, task: &str) -> serde_json::Map<String, Value> {
    json!({"url": url, "task": task}).as_object().unwrap().clone()
}

fn shop_with_search() -> StaticEngine {
    StaticEngine::new()
        .with_page(
            "https://shop.test/",
            "Shop",
            DomNode::element("body").children([
                DomNode::element("h1").text("Welcome"),
                DomNode::element("form").attr("action", "/search").children([
                    DomNode::element("input")
                        .attr("id", "q")
                        .attr("name", "q")
                        .attr("placeholder", "Search products"),
                    DomNode::element("button").attr("type", "submit").text("Search"),
                ]),
            ]),
        )
        .with_page("https://shop.test/search?q=earbuds", "Results", listing_page(4))
}

fn scripted(replies: &[&str]) -> Arc<ModelGateway> {
    let replies = replies.iter().map(|r| r.to_string()).collect();
    Arc::new(ModelGateway::new(
        Arc::new(MockLLMProvider::with_responses(replies)),
        ContentGovernor::default(),
    ))
}

#[tokio::test]
async fn test_invalid_url_fails_before_any_iteration() {
    let engine = shop_engine(3);
    let model = gateway(|_| panic!("no model call expected"));
    let executor = WebAgentExecutor::new(browser_agent(engine.clone(), model));

    let result = executor.invoke(&params("notaurl", "anything")).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(!result.is_completed);
    assert!(result.error);
    assert!(result.message.unwrap().contains("WebAgent failed"));
    assert_eq!(result.result["error"], true);
    assert_eq!(engine.sessions_opened(), 0);
}

#[tokio::test]
async fn test_search_form_then_extract() {
    let engine = shop_with_search();
    let model = scripted(&[
        r##"{"action": {"type": "fill", "target": "#q", "value": "earbuds", "reasoning": "search box"}, "isCompleted": false, "confidence": 0.1}"##,
        r#"```json
{"action": {"type": "click", "target": "button[type=submit]"}, "isCompleted": false, "confidence": 0.2}
```"#,
        r#"{"action": {"type": "extract"}, "isCompleted": false, "confidence": 0.5}"#,
    ]);
    let executor = WebAgentExecutor::new(browser_agent(engine.clone(), model));

    let result = executor
        .invoke(&params("https://shop.test/", "find earbuds"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Complete);
    let payload = &result.result;
    assert_eq!(payload["isCompleted"], true);
    assert_eq!(payload["totalIterations"], 3);
    assert_eq!(payload["result"]["itemCount"], 4);
    assert_eq!(
        payload["result"]["extractedData"][0]["link"],
        "https://shop.test/p/0"
    );

    assert_eq!(
        engine.action_log(),
        vec![
            "goto https://shop.test/".to_string(),
            "fill #q earbuds".to_string(),
            "click button[type=submit]".to_string(),
        ]
    );
    assert_eq!(engine.sessions_closed(), 1);
}

#[tokio::test]
async fn test_unknown_selector_is_recorded_and_run_continues() {
    let engine = shop_engine(2);
    let model = scripted(&[
        r##"{"action": {"type": "click", "target": "#does-not-exist"}, "confidence": 0.1}"##,
        r#"{"isCompleted": true, "confidence": 0.9, "finalAnswer": "Two pairs of earbuds are listed."}"#,
    ]);
    let agent = browser_agent(engine.clone(), model);

    let outcome = agent.execute(SEARCH_URL, "how many earbuds").await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.steps.len(), 1);
    assert!(!outcome.steps[0].action_outcome.success);
    assert_eq!(outcome.result, "Two pairs of earbuds are listed.");
}

#[tokio::test]
async fn test_unparseable_decisions_fall_back_to_extraction() {
    let engine = shop_engine(5);
    let model = gateway(|_| Ok("I think I should look around a bit more.".to_string()));
    let executor = WebAgentExecutor::new(browser_agent(engine.clone(), model));

    let result = executor
        .invoke(&params(SEARCH_URL, "list earbuds"))
        .await
        .unwrap();

    // Two fallback scrolls, then the third fallback extracts before the
    // malformed streak would end the run.
    assert_eq!(result.status, ExecutionStatus::Complete);
    assert_eq!(result.result["totalIterations"], 3);
    assert_eq!(result.result["result"]["itemCount"], 5);
    assert_eq!(
        engine.action_log(),
        vec![
            format!("goto {}", SEARCH_URL),
            "scroll 800".to_string(),
            "scroll 800".to_string(),
        ]
    );
    assert_eq!(engine.sessions_closed(), 1);
}

#[tokio::test]
async fn test_budget_exhaustion_without_items_is_partial() {
    let engine = StaticEngine::new().with_page(
        "https://blog.test/post",
        "Post",
        DomNode::element("body").child(DomNode::element("p").text("Nothing about prices here.")),
    );
    let model = gateway(|messages| {
        if system(messages).starts_with("You summarize") {
            Ok("The page does not list any prices.".to_string())
        } else {
            Ok(r#"{"action": {"type": "scroll", "value": "600"}, "isCompleted": false, "confidence": 0.1}"#.to_string())
        }
    });
    let executor = WebAgentExecutor::new(browser_agent(engine.clone(), model));

    let result = executor
        .invoke(&params("https://blog.test/post", "find prices"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.result["partial"], true);
    assert_eq!(result.result["totalIterations"], 8);
    assert_eq!(result.result["result"], "The page does not list any prices.");
    assert_eq!(engine.sessions_closed(), 1);
}

#[tokio::test]
async fn test_browser_launch_failure_is_reported() {
    let engine = StaticEngine::unavailable();
    let model = gateway(|_| Ok(String::new()));
    let executor = WebAgentExecutor::new(browser_agent(engine.clone(), model));

    let result = executor.invoke(&params(SEARCH_URL, "list")).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.message.unwrap().contains("Could not open a browser session"));
    assert_eq!(engine.sessions_closed(), 0);
}

fn faulty_agent(
    engine: FaultyEngine,
    model: Arc<ModelGateway>,
    config: BrowserAgentConfig,
) -> Arc<BrowserAgent> {
    Arc::new(BrowserAgent::new(Arc::new(engine), model, config))
}

#[tokio::test]
async fn test_page_lost_mid_run_keeps_extracted_items() {
    let shop = shop_engine(3);
    let engine = FaultyEngine::new(shop.clone()).fail_dom_after(2);
    let model = gateway(|messages| {
        assert!(!system(messages).starts_with("You summarize"));
        Ok(r#"{"action": {"type": "extract"}, "isCompleted": false, "confidence": 0.3}"#.to_string())
    });
    let config = BrowserAgentConfig {
        complete_on_extraction: false,
        ..fast_browser_config()
    };
    let executor = WebAgentExecutor::new(faulty_agent(engine, model, config));

    let result = executor
        .invoke(&params(SEARCH_URL, "list earbuds"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Partial);
    let payload = &result.result;
    assert!(payload.get("error").is_none());
    assert_eq!(payload["partial"], true);
    assert_eq!(payload["totalIterations"], 1);
    assert_eq!(payload["result"]["itemCount"], 3);
    assert_eq!(shop.sessions_closed(), 1);
}

#[tokio::test]
async fn test_page_lost_before_load_is_fatal() {
    let shop = shop_engine(3);
    let engine = FaultyEngine::new(shop.clone()).fail_dom_after(0);
    let model = gateway(|_| panic!("no model call expected"));
    let executor = WebAgentExecutor::new(faulty_agent(engine, model, fast_browser_config()));

    let result = executor
        .invoke(&params(SEARCH_URL, "list earbuds"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.result["error"], true);
    assert_eq!(shop.sessions_closed(), 1);
}

#[tokio::test]
async fn test_slow_click_times_out_and_run_continues() {
    let shop = shop_engine(2);
    let engine = FaultyEngine::new(shop.clone()).slow_clicks(300);
    let model = scripted(&[
        r##"{"action": {"type": "click", "target": "#results"}, "confidence": 0.1}"##,
        r#"{"isCompleted": true, "confidence": 0.9, "finalAnswer": "Two pairs are listed."}"#,
    ]);
    let agent = faulty_agent(engine, model, fast_browser_config());

    let outcome = agent.execute(SEARCH_URL, "how many earbuds").await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.iterations, 2);
    let first = &outcome.steps[0].action_outcome;
    assert!(!first.success);
    assert_eq!(first.error.as_deref(), Some("click timed out after 50ms"));
    assert!(!shop.action_log().iter().any(|entry| entry.starts_with("click")));
}

#[tokio::test]
async fn test_suspected_bot_check_waits_before_iterating() {
    let engine = StaticEngine::new().with_page(
        "https://guarded.test/",
        "Just a moment",
        DomNode::element("body").child(
            DomNode::element("p").text("Please complete the captcha to continue"),
        ),
    );
    let model = gateway(|_| {
        Ok(r#"{"isCompleted": true, "confidence": 0.95, "finalAnswer": "Blocked by a captcha."}"#.to_string())
    });
    let config = BrowserAgentConfig {
        anti_bot_wait_ms: 150,
        ..fast_browser_config()
    };
    let agent = Arc::new(BrowserAgent::new(Arc::new(engine.clone()), model, config));

    let started = Instant::now();
    let outcome = agent.execute("https://guarded.test/", "read the page").await.unwrap();

    assert!(started.elapsed().as_millis() >= 150);
    assert!(outcome.is_completed());
    assert_eq!(outcome.result, "Blocked by a captcha.");
    assert_eq!(engine.sessions_closed(), 1);
}
