// Agent system prompts and user message builders

use serde_json::Value;

pub const CODE_REVIEW_PROMPT: &str = r#"You are a CodeReviewAgent, an expert code analyzer that identifies issues and provides feedback.

Analyze the provided code for:
1. Security vulnerabilities (SQL injection, XSS, code injection, etc.)
2. Performance issues (inefficient algorithms, memory leaks, etc.)
3. Code quality problems (poor naming, missing documentation, etc.)
4. Best practices violations (error handling, logging, etc.)
5. Potential bugs and logic errors

Return your analysis as a JSON object with this structure:
{
    "summary": "Brief overview of the code review",
    "issues": [
        {
            "type": "security|performance|quality|bug|style",
            "severity": "high|medium|low",
            "line": line_number_if_applicable,
            "description": "Description of the issue",
            "recommendation": "How to fix the issue"
        }
    ],
    "overall_score": 1-10_rating,
    "recommendations": ["List of general recommendations"]
}

Be thorough but concise in your analysis."#;

pub const DOCUMENTATION_PROMPT: &str = r#"You are a DocumentationAgent, an expert technical writer that creates comprehensive documentation for code.

Based on the provided code and code review findings, create comprehensive documentation in Markdown format that includes:

1. **Overview**: Brief description of what the code does
2. **Functions/Classes**: Document each function and class with purpose, parameters, return values and usage examples
3. **Code Quality Notes**: Known issues, recommended improvements and best practices, based on the review findings
4. **Usage Examples**: Practical examples of how to use the code
5. **Notes**: Any additional important information

Focus on clarity and usefulness for developers who will use or maintain this code.
Return only the Markdown documentation, no additional commentary."#;

pub const TESTING_PROMPT: &str = r#"You are a TestingAgent, an expert at generating comprehensive unit tests for code.

Based on the provided code and code review findings, generate unit tests that cover:

1. **Basic Functionality**: Test that functions work as expected with valid inputs
2. **Edge Cases**: Test boundary conditions, empty inputs, None values, etc.
3. **Error Handling**: Test that appropriate exceptions are raised for invalid inputs
4. **Performance**: Based on review findings, add performance tests if needed
5. **Security**: Test for security issues identified in the review

Return your response as a JSON object with this structure:
{
    "tests": [
        {
            "name": "test_function_name",
            "description": "What this test validates",
            "code": "Test code",
            "type": "unit|integration|performance|security"
        }
    ],
    "count": number_of_tests,
    "framework": "pytest",
    "setup_required": ["list of setup requirements if any"]
}

Focus on practical, executable tests that would catch real issues."#;

fn issues(review: &Value) -> &[Value] {
    review
        .get("issues")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_field<'a>(v: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or(fallback)
}

pub fn review_message(code: &str) -> String {
    format!("Please analyze this code:\n\n```\n{}\n```", code)
}

fn review_context(review: &Value) -> String {
    format!(
        "Code Review Results:\n- Issues found: {}\n- Summary: {}\n",
        issues(review).len(),
        str_field(review, "summary", "No summary available")
    )
}

pub fn documentation_message(code: &str, review: &Value) -> String {
    let mut message = format!(
        "Please create documentation for this code:\n\n```\n{}\n```\n\n{}\nReview Issues:\n",
        code,
        review_context(review)
    );
    for issue in issues(review) {
        message.push_str(&format!(
            "- {}: {}\n",
            str_field(issue, "type", "unknown"),
            str_field(issue, "description", "No description")
        ));
    }
    message
}

pub fn testing_message(code: &str, review: &Value) -> String {
    let mut message = format!(
        "Please generate unit tests for this code:\n\n```\n{}\n```\n\n{}\nSpecific Issues to Test:\n",
        code,
        review_context(review)
    );
    for issue in issues(review) {
        message.push_str(&format!(
            "- {} ({}): {}\n",
            str_field(issue, "type", "unknown"),
            str_field(issue, "severity", "unknown"),
            str_field(issue, "description", "No description")
        ));
    }
    message.push_str(
        "\nPlease generate comprehensive tests that cover the functionality and address the identified issues.",
    );
    message
}
