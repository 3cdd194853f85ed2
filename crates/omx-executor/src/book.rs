//! Order book analysis: spread and maker target price selection.
//!
//! The FAST strategy always joins the top of the book. BEST_PRICE starts
//! several levels deep and walks toward the touch as time passes, trading
//! queue priority for price early on and urgency later.

use rust_decimal::Decimal;
use std::time::Duration;

use omx_core::{ExecutionStrategy, OrderSide, Price};
use omx_exchange::OrderBook;

/// Analyzed book state: the maker price to quote and the current spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookView {
    pub target_price: Price,
    pub spread_pct: Decimal,
}

/// Book depth index to quote at for the given strategy and elapsed time.
fn depth_index(strategy: ExecutionStrategy, elapsed: Duration) -> usize {
    if strategy == ExecutionStrategy::Fast {
        return 0;
    }
    match elapsed.as_secs() {
        0..=9 => 5,
        10..=29 => 4,
        30..=59 => 3,
        60..=119 => 2,
        120..=179 => 1,
        _ => 0,
    }
}

/// Analyze a book update against the currently quoted price.
///
/// Returns a new [`BookView`] when the quote should move: no price yet, a
/// more competitive level is available, or the current price fell outside
/// the book. Returns None when the book is one-sided or the current quote
/// still stands.
pub fn analyze(
    book: &OrderBook,
    side: OrderSide,
    strategy: ExecutionStrategy,
    elapsed: Duration,
    current_price: Option<Price>,
) -> Option<BookView> {
    let spread_pct = book.spread_pct()?;
    let index = depth_index(strategy, elapsed);

    match side {
        OrderSide::Buy => {
            let top = book.best_bid()?;
            let safe_index = index.min(book.bids.len().saturating_sub(1));
            let target = book.bids[safe_index].price;
            let should_update = match current_price {
                None => true,
                // More competitive, or the current quote is above the book.
                Some(current) => target > current || current > top,
            };
            should_update.then_some(BookView {
                target_price: target,
                spread_pct,
            })
        }
        OrderSide::Sell => {
            let top = book.best_ask()?;
            let safe_index = index.min(book.asks.len().saturating_sub(1));
            let target = book.asks[safe_index].price;
            let should_update = match current_price {
                None => true,
                Some(current) => target < current || current < top,
            };
            should_update.then_some(BookView {
                target_price: target,
                spread_pct,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_exchange::mock::ladder_book;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fast_joins_top_of_book() {
        let book = ladder_book(dec!(43200), dec!(43201));
        let view = analyze(
            &book,
            OrderSide::Buy,
            ExecutionStrategy::Fast,
            Duration::from_secs(0),
            None,
        )
        .unwrap();
        assert_eq!(view.target_price, Price::new(dec!(43200)));
    }

    #[test]
    fn test_best_price_starts_deep_and_walks_up() {
        assert_eq!(
            depth_index(ExecutionStrategy::BestPrice, Duration::from_secs(5)),
            5
        );
        assert_eq!(
            depth_index(ExecutionStrategy::BestPrice, Duration::from_secs(45)),
            3
        );
        assert_eq!(
            depth_index(ExecutionStrategy::BestPrice, Duration::from_secs(200)),
            0
        );
    }

    #[test]
    fn test_no_update_when_quote_still_competitive() {
        let book = ladder_book(dec!(43200), dec!(43201));
        // Already quoting at the top bid: nothing to improve.
        let view = analyze(
            &book,
            OrderSide::Buy,
            ExecutionStrategy::Fast,
            Duration::from_secs(0),
            Some(Price::new(dec!(43200))),
        );
        assert!(view.is_none());
    }

    #[test]
    fn test_update_when_book_moved_away() {
        // Book dropped below our quote: quote is no longer valid.
        let book = ladder_book(dec!(43140), dec!(43141));
        let view = analyze(
            &book,
            OrderSide::Buy,
            ExecutionStrategy::Fast,
            Duration::from_secs(0),
            Some(Price::new(dec!(43200))),
        )
        .unwrap();
        assert_eq!(view.target_price, Price::new(dec!(43140)));
    }

    #[test]
    fn test_sell_side_mirrors() {
        let book = ladder_book(dec!(43200), dec!(43201));
        let view = analyze(
            &book,
            OrderSide::Sell,
            ExecutionStrategy::Fast,
            Duration::from_secs(0),
            Some(Price::new(dec!(43150))),
        )
        .unwrap();
        // Quote below the ask is inside the spread; follow the book up.
        assert_eq!(view.target_price, Price::new(dec!(43201)));
    }

    #[test]
    fn test_one_sided_book_yields_none() {
        let mut book = ladder_book(dec!(43200), dec!(43201));
        book.asks.clear();
        assert!(analyze(
            &book,
            OrderSide::Buy,
            ExecutionStrategy::Fast,
            Duration::from_secs(0),
            None
        )
        .is_none());
    }
}
