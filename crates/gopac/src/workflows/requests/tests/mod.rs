mod common;
mod messaging;
