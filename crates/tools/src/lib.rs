//! Built-in tool implementations for ClawdVC.
//!
//! Tools give the model the ability to act on the world: look up market
//! prices, search the web, read and write on MoltBook, search learned
//! knowledge, and use the requester's own linked X account.

pub mod knowledge_search;
pub mod market;
pub mod moltbook;
pub mod web_search;
pub mod x_account;

use clawdvc_core::tool::ToolRegistry;
use clawdvc_store::{AccountStore, KnowledgeStore};
use std::sync::Arc;

pub use market::{CoinGeckoClient, MarketData, PriceSnapshot};
pub use moltbook::{MoltbookClient, Post, SocialPlatform};
pub use x_account::{AccountClient, BirdCli, XAction, XCookies};

/// The collaborators the built-in tools are bound to.
pub struct ToolDeps {
    pub market: Arc<dyn MarketData>,
    pub platform: Arc<dyn SocialPlatform>,
    pub knowledge: Arc<KnowledgeStore>,
    pub accounts: Arc<AccountStore>,
    pub account_client: Arc<dyn AccountClient>,
    /// Brave Search API key; `web_search` is left out without one
    pub brave_api_key: Option<String>,
}

/// Create a registry with every built-in tool.
pub fn default_registry(deps: ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(market::GetCryptoPriceTool::new(deps.market.clone())));
    registry.register(Box::new(market::GetMultipleCryptoPricesTool::new(deps.market.clone())));
    registry.register(Box::new(market::SearchCoinTool::new(deps.market)));

    if let Some(key) = deps.brave_api_key.filter(|k| !k.is_empty()) {
        registry.register(Box::new(web_search::WebSearchTool::new(key)));
    }
    registry.register(Box::new(knowledge_search::KnowledgeSearchTool::new(deps.knowledge.clone())));

    registry.register(Box::new(
        moltbook::MoltbookFeedTool::new(deps.platform.clone()).with_knowledge_fallback(deps.knowledge),
    ));
    registry.register(Box::new(moltbook::MoltbookSearchTool::new(deps.platform.clone())));
    registry.register(Box::new(moltbook::MoltbookProfileTool::new(deps.platform.clone())));
    registry.register(Box::new(moltbook::MoltbookCreatePostTool::new(deps.platform.clone())));
    registry.register(Box::new(moltbook::MoltbookCommentTool::new(deps.platform.clone())));
    registry.register(Box::new(moltbook::MoltbookUpvoteTool::new(deps.platform.clone())));
    registry.register(Box::new(moltbook::MoltbookFollowTool::new(deps.platform)));

    for action in XAction::ALL {
        registry.register(Box::new(x_account::XAccountTool::new(
            action,
            deps.accounts.clone(),
            deps.account_client.clone(),
        )));
    }

    registry
}
