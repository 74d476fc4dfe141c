// Cross-module scenario tests: end-to-end flows through the public Logger
// API that single-module unit tests cannot cover.

mod async_pipeline_tests;
