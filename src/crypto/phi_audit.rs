// Static check over src/: no tracing macro may mention an identifier or
// clinical field, a salt, or raw row access.
