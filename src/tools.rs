//! Widget tool registry
//!
//! The nine "show widget" capabilities the model can select instead of
//! answering in free text. Tools carry no backend computation: executing one
//! simply confirms which widget (and symbol) the UI should render.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A renderable market widget, addressed by its tool name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Widget {
    StockChart,
    StockPrice,
    StockFinancials,
    StockNews,
    StockScreener,
    MarketOverview,
    MarketHeatmap,
    EtfHeatmap,
    TrendingStocks,
}

/// All registered widgets, in declaration order.
pub const ALL_WIDGETS: [Widget; 9] = [
    Widget::StockChart,
    Widget::StockPrice,
    Widget::StockFinancials,
    Widget::StockNews,
    Widget::StockScreener,
    Widget::MarketOverview,
    Widget::MarketHeatmap,
    Widget::EtfHeatmap,
    Widget::TrendingStocks,
];

impl Widget {
    /// Canonical tool name as declared to the model.
    pub fn name(&self) -> &'static str {
        match self {
            Widget::StockChart => "showStockChart",
            Widget::StockPrice => "showStockPrice",
            Widget::StockFinancials => "showStockFinancials",
            Widget::StockNews => "showStockNews",
            Widget::StockScreener => "showStockScreener",
            Widget::MarketOverview => "showMarketOverview",
            Widget::MarketHeatmap => "showMarketHeatmap",
            Widget::EtfHeatmap => "showETFHeatmap",
            Widget::TrendingStocks => "showTrendingStocks",
        }
    }

    /// Natural-language description sent with the tool declaration.
    pub fn description(&self) -> &'static str {
        match self {
            Widget::StockChart => {
                "Show a stock chart of a given stock. Use this to show the chart to the user."
            }
            Widget::StockPrice => {
                "Show the price of a given stock. Use this to show the price and price history to the user."
            }
            Widget::StockFinancials => {
                "Show the financials of a given stock. Use this to show the financials to the user."
            }
            Widget::StockNews => {
                "This tool shows the latest news and events for a stock or cryptocurrency."
            }
            Widget::StockScreener => {
                "This tool shows a generic stock screener which can be used to find new stocks based on financial or technical parameters."
            }
            Widget::MarketOverview => {
                "This tool shows an overview of today's stock, futures, bond, and forex market performance including change values, Open, High, Low, and Close values."
            }
            Widget::MarketHeatmap => {
                "This tool shows a heatmap of today's stock market performance across sectors. It is preferred over showMarketOverview if asked specifically about the stock market."
            }
            Widget::EtfHeatmap => {
                "This tool shows a heatmap of today's ETF performance across sectors and asset classes. It is preferred over showMarketOverview if asked specifically about the ETF market."
            }
            Widget::TrendingStocks => {
                "This tool shows the daily top trending stocks including the top five gaining, losing, and most active stocks based on today's performance"
            }
        }
    }

    /// Whether this tool takes the single required `symbol` argument.
    pub fn requires_symbol(&self) -> bool {
        matches!(
            self,
            Widget::StockChart | Widget::StockPrice | Widget::StockFinancials | Widget::StockNews
        )
    }

    /// Look up a widget by tool name. Unknown names mean the model's output
    /// falls back to the plain-text branch.
    pub fn from_name(name: &str) -> Option<Widget> {
        ALL_WIDGETS.iter().copied().find(|w| w.name() == name)
    }
}

/// OpenAI-compatible function declaration for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

fn parameter_schema(widget: Widget) -> Value {
    if widget.requires_symbol() {
        json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "The name or symbol of the stock or currency. e.g. DOGE/AAPL/USD."
                }
            },
            "required": ["symbol"]
        })
    } else {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }
}

/// Build the full tool registry declared on every tool-selection call.
pub fn tool_specs() -> Vec<ToolSpec> {
    ALL_WIDGETS
        .iter()
        .map(|w| ToolSpec {
            kind: "function",
            function: FunctionSpec {
                name: w.name(),
                description: w.description(),
                parameters: parameter_schema(*w),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nine_tools_registered() {
        let specs = tool_specs();
        assert_eq!(specs.len(), 9);

        let names: Vec<&str> = specs.iter().map(|s| s.function.name).collect();
        assert!(names.contains(&"showStockChart"));
        assert!(names.contains(&"showETFHeatmap"));
        assert!(names.contains(&"showTrendingStocks"));
    }

    #[test]
    fn test_from_name_round_trip() {
        for widget in ALL_WIDGETS {
            assert_eq!(Widget::from_name(widget.name()), Some(widget));
        }
        assert_eq!(Widget::from_name("showStockDividends"), None);
        // Casing matters: the mis-cased variant from the legacy prompt is
        // not a registered tool.
        assert_eq!(Widget::from_name("StockFinancials"), None);
    }

    #[test]
    fn test_symbol_requirements() {
        assert!(Widget::StockChart.requires_symbol());
        assert!(Widget::StockNews.requires_symbol());
        assert!(!Widget::StockScreener.requires_symbol());
        assert!(!Widget::MarketOverview.requires_symbol());
        assert!(!Widget::TrendingStocks.requires_symbol());
    }

    #[test]
    fn test_parameter_schema_shape() {
        let specs = tool_specs();

        let chart = specs
            .iter()
            .find(|s| s.function.name == "showStockChart")
            .unwrap();
        assert_eq!(chart.function.parameters["required"][0], "symbol");

        let screener = specs
            .iter()
            .find(|s| s.function.name == "showStockScreener")
            .unwrap();
        assert!(screener.function.parameters["required"]
            .as_array()
            .unwrap()
            .is_empty());
    }
}
