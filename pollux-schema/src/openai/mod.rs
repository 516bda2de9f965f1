mod chat_request;
mod chat_response;
mod model_list;
mod responses_error;
mod responses_request;
mod responses_response;

pub use chat_request::{
    ChatFunctionDef, ChatMessage, ChatMessageContent, ChatTool, ChatToolCall, ChatToolCallFunction,
    OpenaiChatRequest,
};
pub use chat_response::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta,
    ChatCompletionMessage, ChatCompletionResponse, ChatToolCallDelta, ChatUsage,
};
pub use model_list::{OpenaiModel, OpenaiModelList};
pub use responses_error::{OpenaiResponsesErrorBody, OpenaiResponsesErrorObject};
pub use responses_request::{
    OpenaiInput, OpenaiInputContent, OpenaiInputItem, OpenaiRequestBody, Reasoning,
};
pub use responses_response::{
    ResponsesBody, ResponsesCompletedEvent, ResponsesCreatedEvent, ResponsesFunctionCallDeltaEvent,
    ResponsesOutputItem, ResponsesOutputItemEvent, ResponsesOutputText, ResponsesTextDeltaEvent,
    ResponsesUsage,
};
