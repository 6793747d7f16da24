mod circuit_breaker;
mod load_limit;
