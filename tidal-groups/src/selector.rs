//! Product selector expressions: space-separated union of filters.

use tidal_core::Product;

/// One token of a selector expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectorToken {
    /// `*` matches every product.
    All,
    /// `venue` matches every product on that venue.
    Venue(String),
    /// `venue.symbol` matches a single product.
    Product { venue: String, symbol: String },
}

impl SelectorToken {
    fn matches(&self, product: &Product) -> bool {
        match self {
            Self::All => true,
            Self::Venue(venue) => product.venue_id == *venue,
            Self::Product { venue, symbol } => {
                product.venue_id == *venue && product.symbol == *symbol
            }
        }
    }
}

/// Parsed selector expression; tokens union, an empty expression
/// matches nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProductSelector {
    tokens: Vec<SelectorToken>,
}

impl ProductSelector {
    #[must_use]
    pub fn parse(expression: &str) -> Self {
        let tokens = expression
            .split_whitespace()
            .map(|token| {
                if token == "*" {
                    SelectorToken::All
                } else if let Some((venue, symbol)) = token.split_once('.') {
                    SelectorToken::Product {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                    }
                } else {
                    SelectorToken::Venue(token.to_string())
                }
            })
            .collect();
        Self { tokens }
    }

    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        self.tokens.iter().any(|token| token.matches(product))
    }

    /// Filter the product universe, preserving its order.
    #[must_use]
    pub fn filter(&self, universe: &[Product]) -> Vec<Product> {
        universe
            .iter()
            .filter(|product| self.matches(product))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
