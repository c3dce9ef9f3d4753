//! Prompt templates and the reference catalog of roles.

pub const DEFAULT_ROLE: &str = "Backend Engineer";

const BACKEND_DESCRIPTION: &str = "\
Position: Backend Engineer
Responsibilities:
- Build and maintain backend APIs using Node.js/Python
- Design and implement database schemas
- Integrate with third-party services
- Ensure application security and performance
- Implement CI/CD pipelines

Qualifications:
- At least 2 years of backend development experience
- Proficient with Node.js, Express.js, or a similar framework
- Experience with databases (PostgreSQL, MongoDB)
- Familiar with cloud services (AWS, GCP, Azure)
- Understands microservices and API design
- Experience with Docker and containerization";

const FRONTEND_DESCRIPTION: &str = "\
Position: Frontend Engineer
Responsibilities:
- Build responsive, user-friendly interfaces
- Implement a design system and component library
- Optimize web application performance
- Collaborate with designers and backend engineers
- Ensure cross-browser compatibility

Qualifications:
- At least 2 years of frontend development experience
- Proficient with React.js, Vue.js, or Angular
- Experience with TypeScript and modern JavaScript
- Familiar with CSS preprocessors and build tools
- Understands responsive design and accessibility
- Experience with testing frameworks";

const FULL_STACK_DESCRIPTION: &str = "\
Position: Full Stack Engineer
Responsibilities:
- Build applications end to end, frontend through backend
- Design scalable application architecture
- Ship new features and maintain existing applications
- Collaborate with product and design teams
- Uphold code quality and engineering practices

Qualifications:
- At least 3 years of full stack development experience
- Proficient with a frontend framework (React, Vue, Angular)
- Proficient with backend technology (Node.js, Python, Java)
- Experience with database design and optimization
- Familiar with DevOps practices and cloud deployment
- Strong problem-solving and communication skills";

const BACKEND_BRIEF: &str = "\
CASE STUDY BRIEF - Backend Engineer

Task: Build an inventory management system for e-commerce

Requirements:
1. REST API for CRUD operations (products, categories, suppliers)
2. Authentication and authorization
3. Real-time inventory tracking
4. Payment gateway integration
5. Automated reporting
6. Rate limiting and caching

Technical requirements:
- Node.js with TypeScript
- PostgreSQL with proper indexing
- Proper error handling
- Unit test coverage of at least 80%
- API documentation with Swagger
- Docker containerization
- Monitoring and logging

Deliverables:
- Source code with a clean architecture
- Database schema design
- API documentation
- Unit test results
- Deployment guide
- Performance benchmark report";

const FRONTEND_BRIEF: &str = "\
CASE STUDY BRIEF - Frontend Engineer

Task: Build an analytics dashboard for business intelligence

Requirements:
1. Interactive charts and data visualization
2. Real-time data updates
3. Responsive design for mobile and desktop
4. Advanced filtering and search
5. Data export to several formats
6. User preferences and customization

Technical requirements:
- React.js with TypeScript
- State management with Redux/Zustand
- A chart library (D3.js, Chart.js, or Recharts)
- Proper error boundaries
- Component tests with Jest/RTL
- Accessibility compliance (WCAG 2.1)
- Performance optimization (lazy loading, memoization)

Deliverables:
- Source code with a component library
- Design system documentation
- Test coverage report
- Performance audit results
- Accessibility audit report
- Deployment guide";

const FULL_STACK_BRIEF: &str = "\
CASE STUDY BRIEF - Full Stack Engineer

Task: Build a learning management system (LMS)

Requirements:
1. User management (students, instructors, admins)
2. Course creation and management
3. Video streaming and progress tracking
4. Quizzes and assignments
5. Discussion forum
6. Payment integration
7. Certificate generation
8. Mobile responsive design

Technical requirements:
- Frontend: React.js with TypeScript
- Backend: Node.js with Express.js
- Database: PostgreSQL with Redis caching
- File storage: AWS S3 or equivalent
- Real-time features over WebSocket
- Email notifications
- Comprehensive testing (unit, integration, e2e)
- CI/CD pipeline

Deliverables:
- Full source code (frontend and backend)
- Database design and migrations
- API documentation
- Test coverage reports
- Deployment architecture diagram
- User manual and technical documentation
- Performance and security audit";

/// Roles with a dedicated description and brief.
pub fn known_roles() -> [&'static str; 3] {
    [DEFAULT_ROLE, "Frontend Engineer", "Full Stack Engineer"]
}

/// Reference description for `job_title`, falling back to the backend role.
pub fn job_description(job_title: &str) -> &'static str {
    match job_title {
        "Frontend Engineer" => FRONTEND_DESCRIPTION,
        "Full Stack Engineer" => FULL_STACK_DESCRIPTION,
        _ => BACKEND_DESCRIPTION,
    }
}

/// Case study brief for `job_title`, falling back to the backend role.
pub fn project_brief(job_title: &str) -> &'static str {
    match job_title {
        "Frontend Engineer" => FRONTEND_BRIEF,
        "Full Stack Engineer" => FULL_STACK_BRIEF,
        _ => BACKEND_BRIEF,
    }
}

pub fn cv_evaluation_prompt(job_description: &str, cv_text: &str) -> String {
    format!(
        r#"You are an HR expert evaluating a candidate's CV against a job description.

JOB DESCRIPTION:
{job_description}

CANDIDATE CV:
{cv_text}

Evaluate the CV on:
1. Fit of work experience with the position
2. Relevance of technical skills
3. Level of education
4. Relevant project experience
5. Certifications and achievements

Respond in this JSON format:
{{
  "match_rate": 0.85,
  "feedback": "Detailed explanation of the candidate's fit",
  "strengths": ["Strength 1", "Strength 2"],
  "weaknesses": ["Weakness 1", "Weakness 2"]
}}

match_rate must be a number between 0 and 1."#
    )
}

pub fn project_evaluation_prompt(project_brief: &str, project_text: &str) -> String {
    format!(
        r#"You are a technical reviewer evaluating a candidate's project report.

CASE STUDY BRIEF:
{project_brief}

PROJECT REPORT:
{project_text}

Evaluate the report on:
1. Technical quality of the implementation
2. Understanding of the requirements
3. Quality of documentation
4. Problem solving approach
5. Code quality and best practices

Respond in this JSON format:
{{
  "score": 4.2,
  "feedback": "Detailed explanation of the project's quality",
  "technical_quality": 4.0,
  "implementation_quality": 4.5,
  "documentation_quality": 4.0
}}

score must be a number between 1 and 5."#
    )
}

pub fn final_analysis_prompt(cv_evaluation: &str, project_evaluation: &str, job_title: &str) -> String {
    format!(
        r#"Based on the CV and project evaluations, give a final analysis of the candidate.

CV EVALUATION:
{cv_evaluation}

PROJECT EVALUATION:
{project_evaluation}

POSITION APPLIED FOR: {job_title}

Respond in this JSON format:
{{
  "overall_summary": "Overall summary of the candidate",
  "recommendation": "Whether the candidate should advance to the next stage",
  "fit_score": 0.78
}}

fit_score must be a number between 0 and 1 representing overall fit."#
    )
}
